// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use nova_shapes::{
    ClassId, Compartment, NativeObject, ObjectFlags, ObjectRef, Options, PropertyAttributes,
    PropertyDefinition, PropertyKey, ShapeHandle,
};
use proptest::prelude::*;

fn data() -> PropertyDefinition {
    PropertyDefinition::data(PropertyAttributes::ENUMERATE)
}

fn new_object(compartment: &mut Compartment) -> NativeObject {
    NativeObject::new(compartment, ClassId(0), None, None, 4).unwrap()
}

fn shared(handle: ShapeHandle) -> nova_shapes::Shape {
    match handle {
        ShapeHandle::Shared(shape) => shape,
        ShapeHandle::Dictionary(_) => panic!("expected a tree shape"),
    }
}

#[test]
fn two_properties_form_a_chain() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let root = shared(object.last_property());
    let x = compartment.atomize("x");
    let y = compartment.atomize("y");

    let s1 = shared(object.add_property(&mut compartment, x, data()).unwrap());
    let s2 = shared(object.add_property(&mut compartment, y, data()).unwrap());

    assert_eq!(object.last_property(), ShapeHandle::Shared(s2));
    assert_eq!(s2.get_parent(&compartment), Some(s1));
    assert_eq!(s1.get_parent(&compartment), Some(root));
    assert_eq!(s1.get_maybe_slot(&compartment), Some(0));
    assert_eq!(s2.get_maybe_slot(&compartment), Some(1));
    assert_eq!(object.property_count(&compartment), 2);
    assert_eq!(object.slot_span(&compartment), 2);
    assert_eq!(object.num_fixed_slots(&compartment), 4);
    assert_eq!(object.keys(&compartment), vec![x, y]);
    let from_last: Vec<_> = object.shapes_from_last(&compartment).collect();
    assert_eq!(
        from_last,
        vec![ShapeHandle::Shared(s2), ShapeHandle::Shared(s1)]
    );
    assert!(!object.in_dictionary_mode());
}

#[test]
fn unrelated_objects_share_shapes() {
    let mut compartment = Compartment::new(Options::default());
    let mut a = new_object(&mut compartment);
    let mut b = new_object(&mut compartment);
    assert_eq!(a.current_shape(), b.current_shape());
    let x = compartment.atomize("x");
    let sa = a.add_property(&mut compartment, x, data()).unwrap();
    let shapes = compartment.shape_count();
    let sb = b.add_property(&mut compartment, x, data()).unwrap();
    assert_eq!(sa, sb);
    assert_eq!(compartment.shape_count(), shapes);
    assert_eq!(a.current_shape(), b.current_shape());
}

#[test]
fn different_attributes_fork_the_tree() {
    let mut compartment = Compartment::new(Options::default());
    let mut a = new_object(&mut compartment);
    let mut b = new_object(&mut compartment);
    let x = compartment.atomize("x");
    a.add_property(&mut compartment, x, data()).unwrap();
    b.add_property(
        &mut compartment,
        x,
        PropertyDefinition::data(PropertyAttributes::ENUMERATE | PropertyAttributes::READONLY),
    )
    .unwrap();
    assert_ne!(a.current_shape(), b.current_shape());
    let ShapeHandle::Shared(sa) = a.last_property() else {
        unreachable!()
    };
    let ShapeHandle::Shared(sb) = b.last_property() else {
        unreachable!()
    };
    assert_eq!(sa.get_parent(&compartment), sb.get_parent(&compartment));
}

#[test]
fn accessor_properties_have_no_slot() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    let getter = nova_shapes::Accessor::Native(nova_shapes::NativeAccessor(7));
    let y = compartment.atomize("y");
    object.add_property(&mut compartment, x, data()).unwrap();
    let handle = object
        .add_property(
            &mut compartment,
            y,
            PropertyDefinition::accessor(Some(getter), None, PropertyAttributes::ENUMERATE),
        )
        .unwrap();
    let info = object.property(&compartment, handle).unwrap();
    assert_eq!(info.slot, None);
    assert_eq!(info.getter, Some(getter));
    assert_eq!(info.setter, None);
    assert!(info.attributes.contains(PropertyAttributes::SHARED));
    assert_eq!(object.slot_span(&compartment), 1);
    assert!(!object.in_dictionary_mode());
}

#[test]
fn repeated_searches_hashify_a_long_chain() {
    let mut compartment = Compartment::new(Options {
        linear_searches_max: 2,
        min_hashify_entries: 4,
        ..Default::default()
    });
    let mut object = new_object(&mut compartment);
    let names = ["a", "b", "c", "d", "e", "f"];
    let keys: Vec<PropertyKey> = names.iter().map(|name| compartment.atomize(name)).collect();
    for key in &keys {
        object.add_property(&mut compartment, *key, data()).unwrap();
    }
    let last = shared(object.last_property());
    assert!(!last.has_table(&compartment));
    let tables = compartment.memory_usage().property_tables;

    for _ in 0..3 {
        assert!(object.search(&mut compartment, keys[0]).is_some());
    }
    assert!(last.has_table(&compartment));
    assert!(compartment.memory_usage().property_tables > tables);
    assert_eq!(object.last_property(), ShapeHandle::Shared(last));

    for (slot, key) in keys.iter().enumerate() {
        let handle = object.search(&mut compartment, *key).unwrap();
        assert_eq!(
            object.property(&compartment, handle).unwrap().slot,
            Some(slot as u32)
        );
    }
    let missing = compartment.atomize("missing");
    assert_eq!(object.search(&mut compartment, missing), None);

    // Children of a hashified shape are ordinary tree shapes.
    let g = compartment.atomize("g");
    let child = shared(object.add_property(&mut compartment, g, data()).unwrap());
    assert!(!child.has_table(&compartment));
    assert_eq!(child.get_parent(&compartment), Some(last));
}

#[test]
fn short_chains_are_never_hashified() {
    let mut compartment = Compartment::new(Options {
        linear_searches_max: 1,
        min_hashify_entries: 4,
        ..Default::default()
    });
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    object.add_property(&mut compartment, x, data()).unwrap();
    for _ in 0..10 {
        object.search(&mut compartment, x).unwrap();
    }
    assert!(!shared(object.last_property()).has_table(&compartment));
}

#[test]
fn tall_chains_become_dictionaries() {
    let mut compartment = Compartment::new(Options {
        max_tree_height: 4,
        ..Default::default()
    });
    let mut object = new_object(&mut compartment);
    for name in ["a", "b", "c", "d"] {
        let key = compartment.atomize(name);
        object.add_property(&mut compartment, key, data()).unwrap();
    }
    assert!(!object.in_dictionary_mode());
    let e = compartment.atomize("e");
    object.add_property(&mut compartment, e, data()).unwrap();
    assert!(object.in_dictionary_mode());
    assert_eq!(object.property_count(&compartment), 5);
    assert_eq!(object.slot_span(&compartment), 5);
}

#[test]
fn unstable_slot_makes_a_dictionary() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    let y = compartment.atomize("y");
    let z = compartment.atomize("z");
    object.add_property(&mut compartment, x, data()).unwrap();
    object
        .add_property(&mut compartment, y, data().with_slot(1))
        .unwrap();
    assert!(!object.in_dictionary_mode());
    let handle = object
        .add_property(&mut compartment, z, data().with_slot(5))
        .unwrap();
    assert!(object.in_dictionary_mode());
    assert_eq!(object.property(&compartment, handle).unwrap().slot, Some(5));
    assert_eq!(object.slot_span(&compartment), 6);
}

#[test]
fn initial_shapes_depend_on_prototype_and_slots() {
    let mut compartment = Compartment::new(Options::default());
    let proto = ObjectRef::from_u32(10);
    let a = NativeObject::new(&mut compartment, ClassId(1), proto, None, 2).unwrap();
    let b = NativeObject::new(&mut compartment, ClassId(1), proto, None, 2).unwrap();
    let c = NativeObject::new(&mut compartment, ClassId(1), None, None, 2).unwrap();
    let d = NativeObject::new(&mut compartment, ClassId(1), proto, None, 6).unwrap();
    assert_eq!(a.current_shape(), b.current_shape());
    assert_ne!(a.current_shape(), c.current_shape());
    assert_ne!(a.current_shape(), d.current_shape());
    assert_eq!(a.proto(), proto);
    assert_eq!(a.class(&compartment), ClassId(1));
    assert_eq!(compartment.initial_shape_count(), 3);
}

#[test]
fn inserted_initial_shape_starts_new_objects() {
    let mut compartment = Compartment::new(Options::default());
    let mut template = NativeObject::new(&mut compartment, ClassId(5), None, None, 1).unwrap();
    let last_index = compartment.atomize("lastIndex");
    let shape = shared(
        template
            .add_property(&mut compartment, last_index, data())
            .unwrap(),
    );
    compartment.insert_initial_shape(shape, None).unwrap();

    let object = NativeObject::new(&mut compartment, ClassId(5), None, None, 1).unwrap();
    assert_eq!(object.last_property(), ShapeHandle::Shared(shape));
    assert_eq!(object.keys(&compartment), vec![last_index]);
}

#[test]
fn flags_replace_the_last_shape() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    let before = shared(object.add_property(&mut compartment, x, data()).unwrap());
    object.set_delegate(&mut compartment).unwrap();
    assert!(object.is_delegate(&compartment));
    assert!(!object.in_dictionary_mode());
    let after = shared(object.last_property());
    assert_ne!(before, after);
    assert_eq!(after.get_parent(&compartment), before.get_parent(&compartment));
    assert_eq!(after.get_maybe_slot(&compartment), Some(0));

    // Setting a flag twice is a no-op.
    object.set_delegate(&mut compartment).unwrap();
    assert_eq!(object.last_property(), ShapeHandle::Shared(after));

    // Other objects reach the same shape through the same steps.
    let mut other = new_object(&mut compartment);
    other.add_property(&mut compartment, x, data()).unwrap();
    other.set_flag(&mut compartment, ObjectFlags::DELEGATE).unwrap();
    assert_eq!(other.current_shape(), object.current_shape());
}

#[test]
fn flags_on_an_empty_object_use_the_initial_shape() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    object.prevent_extensions(&mut compartment).unwrap();
    assert!(!object.is_extensible(&compartment));
    let ShapeHandle::Shared(shape) = object.last_property() else {
        unreachable!()
    };
    assert!(shape.is_empty_shape(&compartment));
    let frozen = compartment
        .initial_shape(ClassId(0), None, None, 4, ObjectFlags::NOT_EXTENSIBLE)
        .unwrap();
    assert_eq!(shape, frozen);
}

#[test]
fn set_parent_changes_the_layout() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    object.add_property(&mut compartment, x, data()).unwrap();
    let global = ObjectRef::from_u32(3);
    object.set_parent(&mut compartment, global).unwrap();
    assert_eq!(object.parent(&compartment), global);
    assert_eq!(object.keys(&compartment), vec![x]);
    let before = object.current_shape();
    object.set_parent(&mut compartment, global).unwrap();
    assert_eq!(object.current_shape(), before);
}

#[test]
fn removing_the_last_property_retracts() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    let y = compartment.atomize("y");
    let s1 = object.add_property(&mut compartment, x, data()).unwrap();
    object.add_property(&mut compartment, y, data()).unwrap();
    object.remove_property(&mut compartment, y).unwrap();
    assert_eq!(object.last_property(), s1);
    assert!(!object.in_dictionary_mode());
    assert_eq!(compartment.property_removals(), 1);

    // Removing a missing key is fine.
    object.remove_property(&mut compartment, y).unwrap();
    assert_eq!(object.last_property(), s1);
    assert_eq!(compartment.property_removals(), 1);
}

#[test]
fn removing_after_a_flag_change_makes_a_dictionary() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let x = compartment.atomize("x");
    object.add_property(&mut compartment, x, data()).unwrap();
    object.set_delegate(&mut compartment).unwrap();
    object.remove_property(&mut compartment, x).unwrap();
    assert!(object.in_dictionary_mode());
    assert!(object.is_delegate(&compartment));
    assert_eq!(object.property_count(&compartment), 0);
}

#[test]
fn rollback_pops_properties() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let mut handles = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let key = compartment.atomize(name);
        handles.push(object.add_property(&mut compartment, key, data()).unwrap());
    }
    object.rollback_properties(&compartment, 2);
    assert_eq!(object.last_property(), handles[1]);
    assert_eq!(object.slot_span(&compartment), 2);
    object.rollback_properties(&compartment, 0);
    assert_eq!(object.property_count(&compartment), 0);
}

#[test]
fn clear_returns_to_the_root() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let root = object.last_property();
    for name in ["a", "b"] {
        let key = compartment.atomize(name);
        object.add_property(&mut compartment, key, data()).unwrap();
    }
    object.clear(&mut compartment).unwrap();
    assert_eq!(object.last_property(), root);
    assert_eq!(object.property_count(&compartment), 0);
    assert_eq!(compartment.property_removals(), 1);
}

#[test]
fn index_keys_mark_the_layout() {
    let mut compartment = Compartment::new(Options::default());
    let mut object = new_object(&mut compartment);
    let index = compartment.atomize("3");
    assert_eq!(index, PropertyKey::Integer(3));
    assert!(!object.object_flags(&compartment).contains(ObjectFlags::INDEXED));
    object.add_property(&mut compartment, index, data()).unwrap();
    assert!(object.object_flags(&compartment).contains(ObjectFlags::INDEXED));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn equal_sequences_share_shapes(order in prop::collection::vec(0usize..10, 0..16)) {
        let mut compartment = Compartment::new(Options::default());
        let mut names: Vec<usize> = Vec::new();
        for index in order {
            if !names.contains(&index) {
                names.push(index);
            }
        }
        let keys: Vec<PropertyKey> = names
            .iter()
            .map(|index| compartment.atomize(&format!("p{index}")))
            .collect();

        let mut a = new_object(&mut compartment);
        let mut b = new_object(&mut compartment);
        let mut a_shapes = Vec::new();
        for key in &keys {
            a_shapes.push(a.add_property(&mut compartment, *key, data()).unwrap());
        }
        let shapes = compartment.shape_count();
        for (key, a_shape) in keys.iter().zip(&a_shapes) {
            let b_shape = b.add_property(&mut compartment, *key, data()).unwrap();
            prop_assert_eq!(b_shape, *a_shape);
        }
        prop_assert_eq!(compartment.shape_count(), shapes);
        prop_assert_eq!(a.current_shape(), b.current_shape());
        prop_assert_eq!(a.keys(&compartment), keys);
    }
}
