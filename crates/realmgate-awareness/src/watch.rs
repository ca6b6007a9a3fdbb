//! Area watch: the set of remote entities within a radius of a moving
//! center, with enter/leave transitions computed on demand.

use std::collections::HashSet;

use glam::Vec3;

use crate::entity::{EntityRegistry, Guid};

// ---------------------------------------------------------------------------
// AwarenessEvent
// ---------------------------------------------------------------------------

/// Membership change reported by [`AreaWatch::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwarenessEvent {
    Entered(Guid),
    Left(Guid),
}

/// Returns `true` if `a` and `b` are within `radius` of each other.
/// Compares squared distances.
pub fn within_radius(a: Vec3, b: Vec3, radius: f32) -> bool {
    a.distance_squared(b) <= radius * radius
}

// ---------------------------------------------------------------------------
// AreaWatch
// ---------------------------------------------------------------------------

/// A recomputable view over an [`EntityRegistry`]: the guids whose position
/// lies within `radius` of `center`.
#[derive(Debug, Clone)]
pub struct AreaWatch {
    center: Vec3,
    radius: f32,
    exclude_self: bool,
    self_guid: Option<Guid>,
    watched: HashSet<Guid>,
}

impl AreaWatch {
    /// Create a watch and populate it from `registry` without reporting
    /// any events.
    pub fn new(center: Vec3, radius: f32, registry: &EntityRegistry) -> Self {
        let mut watch = Self {
            center,
            radius: radius.max(0.0),
            exclude_self: false,
            self_guid: None,
            watched: HashSet::new(),
        };
        watch.rescan(registry);
        watch
    }

    /// Never watch `guid` (the local avatar). Drops it from the watched set
    /// without reporting a `Left`.
    pub fn exclude_self(mut self, guid: Guid) -> Self {
        self.set_self_guid(Some(guid));
        self
    }

    /// Like [`exclude_self`](Self::exclude_self); `None` lifts the exclusion
    /// and the next [`update`](Self::update) may report the avatar again.
    pub fn set_self_guid(&mut self, guid: Option<Guid>) {
        self.self_guid = guid;
        self.exclude_self = guid.is_some();
        if let Some(guid) = guid {
            self.watched.remove(&guid);
        }
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Move the center. The next [`update`](Self::update) reports what
    /// entered and left as a result.
    pub fn set_center(&mut self, center: Vec3) {
        self.center = center;
    }

    /// Change center and radius and rebuild the baseline silently.
    pub fn reconfigure(&mut self, center: Vec3, radius: f32, registry: &EntityRegistry) {
        self.center = center;
        self.radius = radius.max(0.0);
        self.rescan(registry);
    }

    pub fn watched(&self) -> &HashSet<Guid> {
        &self.watched
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.watched.contains(&guid)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    fn admits(&self, guid: Guid, position: Vec3) -> bool {
        if self.exclude_self && self.self_guid == Some(guid) {
            return false;
        }
        within_radius(self.center, position, self.radius)
    }

    /// Rebuild the watched set from scratch. Emits nothing.
    pub fn rescan(&mut self, registry: &EntityRegistry) {
        let watched = registry
            .iter()
            .filter(|entity| self.admits(entity.guid, entity.position))
            .map(|entity| entity.guid)
            .collect();
        self.watched = watched;
    }

    /// Diff the watched set against `registry`.
    ///
    /// Pass 1 walks the watched set and drops guids that vanished or moved
    /// out of range. Pass 2 walks the registry and adds in-range guids not
    /// yet watched. `Left` events precede `Entered` events; within each
    /// group the order is by guid.
    pub fn update(&mut self, registry: &EntityRegistry) -> Vec<AwarenessEvent> {
        let mut left: Vec<Guid> = self
            .watched
            .iter()
            .copied()
            .filter(|guid| match registry.get(*guid) {
                Some(entity) => !self.admits(entity.guid, entity.position),
                None => true,
            })
            .collect();
        for guid in &left {
            self.watched.remove(guid);
        }

        let mut entered: Vec<Guid> = registry
            .iter()
            .filter(|entity| !self.watched.contains(&entity.guid))
            .filter(|entity| self.admits(entity.guid, entity.position))
            .map(|entity| entity.guid)
            .collect();
        self.watched.extend(entered.iter().copied());

        left.sort_unstable();
        entered.sort_unstable();
        if !left.is_empty() || !entered.is_empty() {
            tracing::debug!(
                entered = entered.len(),
                left = left.len(),
                watched = self.watched.len(),
                "Area watch changed"
            );
        }

        left.into_iter()
            .map(AwarenessEvent::Left)
            .chain(entered.into_iter().map(AwarenessEvent::Entered))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests::creature;
    use proptest::prelude::*;

    fn at_distance(d: f32) -> Vec3 {
        Vec3::new(d, 0.0, 0.0)
    }

    #[test]
    fn test_entity_outside_radius_is_not_watched() {
        let mut registry = EntityRegistry::new();
        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);

        registry.spawn(creature(1, at_distance(50.0)));
        assert!(watch.update(&registry).is_empty());
        assert!(!watch.contains(Guid(1)));
    }

    #[test]
    fn test_enter_then_despawn_reports_each_once() {
        let mut registry = EntityRegistry::new();
        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);

        registry.spawn(creature(1, at_distance(50.0)));
        assert!(watch.update(&registry).is_empty());

        registry.set_position(Guid(1), at_distance(30.0));
        assert_eq!(watch.update(&registry), vec![AwarenessEvent::Entered(Guid(1))]);
        assert!(watch.update(&registry).is_empty());

        registry.despawn(Guid(1));
        assert_eq!(watch.update(&registry), vec![AwarenessEvent::Left(Guid(1))]);
        for _ in 0..3 {
            assert!(watch.update(&registry).is_empty());
            assert!(!watch.contains(Guid(1)));
        }
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut registry = EntityRegistry::new();
        registry.spawn(creature(1, at_distance(40.0)));
        let watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);
        assert!(watch.contains(Guid(1)));
    }

    #[test]
    fn test_simultaneous_leave_and_enter() {
        let mut registry = EntityRegistry::new();
        registry.spawn(creature(1, at_distance(10.0)));
        registry.spawn(creature(2, at_distance(100.0)));
        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);

        registry.set_position(Guid(1), at_distance(100.0));
        registry.set_position(Guid(2), at_distance(10.0));
        assert_eq!(
            watch.update(&registry),
            vec![
                AwarenessEvent::Left(Guid(1)),
                AwarenessEvent::Entered(Guid(2))
            ]
        );
    }

    #[test]
    fn test_moving_center_diffs_like_moving_entities() {
        let mut registry = EntityRegistry::new();
        registry.spawn(creature(1, at_distance(0.0)));
        registry.spawn(creature(2, at_distance(100.0)));
        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);

        watch.set_center(at_distance(100.0));
        assert_eq!(
            watch.update(&registry),
            vec![
                AwarenessEvent::Left(Guid(1)),
                AwarenessEvent::Entered(Guid(2))
            ]
        );
    }

    #[test]
    fn test_exclude_self() {
        let mut registry = EntityRegistry::new();
        registry.spawn(creature(1, Vec3::ZERO));
        registry.spawn(creature(2, at_distance(5.0)));

        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry).exclude_self(Guid(1));
        assert!(!watch.contains(Guid(1)));
        assert!(watch.update(&registry).is_empty());
        assert!(watch.contains(Guid(2)));
        assert!(!watch.contains(Guid(1)));
    }

    #[test]
    fn test_self_guid_change_is_silent() {
        let mut registry = EntityRegistry::new();
        registry.spawn(creature(1, Vec3::ZERO));
        registry.spawn(creature(2, at_distance(5.0)));

        let mut watch = AreaWatch::new(Vec3::ZERO, 40.0, &registry);
        assert!(watch.contains(Guid(1)));
        watch.set_self_guid(Some(Guid(1)));
        assert_eq!(watch.len(), 1);
        assert!(watch.update(&registry).is_empty());

        // Lifting the exclusion lets the avatar back in through a normal update.
        watch.set_self_guid(None);
        assert_eq!(watch.update(&registry), vec![AwarenessEvent::Entered(Guid(1))]);
    }

    #[test]
    fn test_rescan_emits_no_events() {
        let mut registry = EntityRegistry::new();
        let mut watch = AreaWatch::new(Vec3::ZERO, 10.0, &registry);
        for guid in 1..=5 {
            registry.spawn(creature(guid, at_distance(guid as f32 * 20.0)));
        }

        watch.reconfigure(Vec3::ZERO, 200.0, &registry);
        assert_eq!(watch.len(), 5);
        assert!(watch.update(&registry).is_empty());
    }

    fn expected(watch: &AreaWatch, registry: &EntityRegistry, self_guid: Guid) -> HashSet<Guid> {
        registry
            .iter()
            .filter(|e| e.guid != self_guid)
            .filter(|e| within_radius(watch.center(), e.position, watch.radius()))
            .map(|e| e.guid)
            .collect()
    }

    proptest! {
        #[test]
        fn test_update_matches_membership_rule(
            initial in prop::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 1..20),
            moves in prop::collection::vec((0usize..20, -100.0f32..100.0, -100.0f32..100.0), 0..20),
            despawns in prop::collection::vec(0usize..20, 0..5),
            radius in 1.0f32..80.0,
        ) {
            let mut registry = EntityRegistry::new();
            for (i, (x, y)) in initial.iter().enumerate() {
                registry.spawn(creature(i as u64, Vec3::new(*x, *y, 0.0)));
            }
            let self_guid = Guid(0);
            let mut watch = AreaWatch::new(Vec3::ZERO, radius, &registry).exclude_self(self_guid);
            watch.update(&registry);

            for (i, x, y) in moves {
                registry.set_position(Guid(i as u64), Vec3::new(x, y, 0.0));
            }
            for i in despawns {
                registry.despawn(Guid(i as u64));
            }
            let before = watch.watched().clone();
            let events = watch.update(&registry);

            prop_assert_eq!(watch.watched(), &expected(&watch, &registry, self_guid));
            for event in events {
                match event {
                    AwarenessEvent::Entered(guid) => prop_assert!(!before.contains(&guid)),
                    AwarenessEvent::Left(guid) => prop_assert!(before.contains(&guid)),
                }
            }
        }
    }
}
