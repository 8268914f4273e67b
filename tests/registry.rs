use sparse_ecs::{Added, Changed, Component, Entity, Registry, ScheduleError, With, Without};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(f32, f32);
impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vectory(f32, f32);
impl Component for Vectory {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Direction(i8);
impl Component for Direction {}

#[derive(Debug, PartialEq)]
struct Name(String);
impl Component for Name {}

#[test]
fn query_filters_pick_exact_entities() {
    let mut registry = Registry::new();
    let e0 = registry.spawn(Position(0.0, 0.0));
    let e1 = registry.spawn((Position(1.0, 1.0), Vectory(1.0, 0.0)));
    let e2 = registry.spawn((Position(2.0, 2.0), Vectory(0.0, 1.0), Direction(1)));

    {
        let query =
            registry.query_filtered::<(Entity, &Position), (With<Vectory>, Without<Direction>)>();
        let found: Vec<_> = query.iter().collect();
        assert_eq!(found, vec![(e1, &Position(1.0, 1.0))]);
    }
    {
        let query =
            registry.query_filtered::<(Entity, &Vectory), (With<Position>, With<Direction>)>();
        let found: Vec<_> = query.iter().collect();
        assert_eq!(found, vec![(e2, &Vectory(0.0, 1.0))]);
    }

    assert_eq!(registry.count::<&Position>(), 3);
    assert_eq!(registry.count_filtered::<Entity, Without<Vectory>>(), 1);
    assert!(registry.query::<Entity>().contains(e0));
}

#[test]
fn reused_ids_get_new_versions() {
    let mut registry = Registry::new();
    let first = registry.spawn(Name("first".into()));
    registry.despawn(first);

    let second = registry.spawn(Name("second".into()));

    assert_eq!(first.id(), second.id());
    assert_ne!(first.version(), second.version());
    assert!(!registry.alive(first));
    assert!(registry.alive(second));
    assert_eq!(registry.get::<Name>(second).0, "second");
    assert_eq!(registry.removed::<Name>(), &[first]);
}

#[test]
fn added_and_changed_use_inclusive_ticks() {
    let mut registry = Registry::new();
    registry.ready().unwrap();

    let spawned_at = registry.tick();
    let entity = registry.spawn(Position(0.0, 0.0));

    registry.update();
    let replaced_at = registry.tick();
    registry.replace(entity, Position(1.0, 1.0));

    assert_eq!(registry.count_since::<Entity, Added<Position>>(spawned_at), 1);
    assert_eq!(registry.count_since::<Entity, Added<Position>>(spawned_at - 1), 1);
    assert_eq!(registry.count_since::<Entity, Added<Position>>(spawned_at + 1), 0);

    assert_eq!(registry.count_since::<Entity, Changed<Position>>(replaced_at), 1);
    assert_eq!(registry.count_since::<Entity, Changed<Position>>(replaced_at + 1), 0);

    let ticks = registry
        .query::<&mut Position>()
        .iter_mut()
        .next()
        .map(|position| position.ticks());
    assert_eq!(ticks.map(|ticks| ticks.added), Some(spawned_at));
    assert_eq!(ticks.map(|ticks| ticks.changed), Some(replaced_at));
}

#[test]
fn removal_log_lives_until_the_next_update() {
    let mut registry = Registry::new();
    registry.ready().unwrap();

    let a = registry.spawn(Position(0.0, 0.0));
    let b = registry.spawn(Position(1.0, 0.0));

    registry.remove::<Position>(a);
    registry.remove::<Position>(a);
    registry.despawn(b);
    assert_eq!(registry.removed::<Position>(), &[a, b]);

    registry.update();
    assert!(registry.removed::<Position>().is_empty());
}

#[test]
fn second_resource_init_is_ignored() {
    let mut registry = Registry::new();

    assert!(registry.init_resource(Name("kept".into())));
    assert!(!registry.init_resource(Name("dropped".into())));
    assert!(!registry.init_resource_with(|| -> Name { unreachable!() }));
    assert_eq!(registry.resource::<Name>().0, "kept");

    registry.commands().init_resource(Name("queued".into()));
    registry.flush_commands();
    assert_eq!(registry.resource::<Name>().0, "kept");

    assert_eq!(registry.remove_resource::<Name>(), Some(Name("kept".into())));
    assert_eq!(registry.remove_resource::<Name>(), None);
}

#[test]
fn resource_tuples() {
    let mut registry = Registry::new();
    registry.init_resources((1u32, Name("n".into())));

    assert!(registry.resources_exist::<(u32, Name)>());
    assert!(!registry.resources_exist::<(u32, u8)>());

    {
        let (mut number, mut name) = registry.resources_mut::<(u32, Name)>();
        *number += 1;
        name.0.push('!');
    }

    let (number, name) = registry.resources::<(u32, Name)>();
    assert_eq!(*number, 2);
    assert_eq!(name.0, "n!");
}

#[test]
fn contradicting_constraints_fail_ready() {
    fn a() {}
    fn b() {}

    use sparse_ecs::IntoSystemConfig;

    let mut registry = Registry::new();
    registry.add_update_system(a.after(b));
    registry.add_update_system(b.after(a));

    match registry.ready() {
        Err(ScheduleError::OrderingCycle { stage, systems }) => {
            assert_eq!(stage, "Update");
            assert_eq!(systems.len(), 2);
        }
        Ok(()) => panic!("cycle was accepted"),
    }
    assert!(!registry.is_ready());
}

#[test]
#[should_panic(expected = "already contained component")]
fn bundles_reject_duplicate_types() {
    let mut registry = Registry::new();
    registry.spawn((Direction(0), (Position(0.0, 0.0), Direction(1))));
}

#[test]
fn nested_bundles_and_batches() {
    let mut registry = Registry::new();
    let entity = registry.spawn((Direction(0), (Position(0.0, 0.0), Vectory(1.0, 1.0))));

    let (direction, (position, vectory)) = registry.get::<(Direction, (Position, Vectory))>(entity);
    assert_eq!(*direction, Direction(0));
    assert_eq!(*position, Position(0.0, 0.0));
    assert_eq!(*vectory, Vectory(1.0, 1.0));
    drop((direction, position, vectory));

    let spawned = registry.spawn_batch((0..10).map(|i| (Direction(i), Position(i as f32, 0.0))));
    assert_eq!(spawned.len(), 10);
    assert_eq!(registry.count::<(&Direction, &Position)>(), 11);
}

#[test]
fn clear_empties_everything_but_schedules() {
    let mut registry = Registry::new();
    let entity = registry.spawn(Position(0.0, 0.0));
    registry.init_resource(5u64);
    registry.commands().spawn(Position(1.0, 1.0));

    registry.clear();
    registry.flush_commands();

    assert!(!registry.alive(entity));
    assert_eq!(registry.entity_count(), 0);
    assert!(!registry.contains_resource::<u64>());

    let entity = registry.spawn(Position(2.0, 2.0));
    assert_eq!(registry.query::<&Position>().single(), Some(&Position(2.0, 2.0)));
    assert!(registry.alive(entity));
}
