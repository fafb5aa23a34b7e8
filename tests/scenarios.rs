//! End-to-end scenarios: diff on the sending side, encode, ship the bytes,
//! apply on a mirror.

mod common;

use common::{button, page, registry};
use uisync::diff::{diff, DiffOp, Path, Position, Snapshot};
use uisync::identity::IdentityIndex;
use uisync::model::{FieldDef, FieldKind, Observable, Schema, SchemaRegistry, Value};
use uisync::patch::{deserialize, encode, serialize, Mirror, NodeOp, PatchValue};

static POINT: Schema = Schema::new(
    "Point",
    &[
        FieldDef::new("x", FieldKind::Int),
        FieldDef::new("y", FieldKind::Int),
    ],
);

fn ship(previous: Option<&Snapshot>, root: &Observable, index: &IdentityIndex) -> (Vec<DiffOp>, Vec<u8>, Snapshot) {
    let result = diff(previous, root, index);
    let bytes = serialize(&encode(&result.changes).unwrap()).unwrap();
    (result.changes.ops, bytes, result.snapshot)
}

#[test]
fn test_simple_field_update() {
    let index = IdentityIndex::new();
    let mut mirror = Mirror::new(SchemaRegistry::new().with(&POINT));
    let p = Observable::with_fields(&POINT, [("x", 1), ("y", 2)]).unwrap();

    let (_, bytes, snapshot) = ship(None, &p, &index);
    mirror.apply_bytes(&bytes).unwrap();

    p.set_field("y", 5).unwrap();
    let (ops, bytes, _) = ship(Some(&snapshot), &p, &index);
    assert_eq!(
        ops,
        vec![DiffOp::Set {
            path: Path::root().field("y"),
            value: PatchValue::Int(5),
        }]
    );

    let doc = deserialize(&bytes).unwrap();
    assert_eq!(doc.op_count(), 1);
    assert!(doc.root.children.is_empty());

    let outcome = mirror.apply_bytes(&bytes).unwrap();
    assert_eq!((outcome.applied, outcome.skipped), (1, 0));
    let remote = mirror.root().unwrap();
    assert_eq!(remote.get("x").unwrap(), Value::Int(1));
    assert_eq!(remote.get("y").unwrap(), Value::Int(5));
}

#[test]
fn test_element_insertion() {
    let index = IdentityIndex::new();
    let mut mirror = Mirror::new(registry());
    let root = page("list");
    let (a, b, c) = (button("a", 0), button("b", 0), button("c", 0));
    let controls = root.list("controls").unwrap();
    controls.push(&a).unwrap();
    controls.push(&b).unwrap();

    let (_, bytes, snapshot) = ship(None, &root, &index);
    mirror.apply_bytes(&bytes).unwrap();
    let remote_a = mirror.resolve(index.identity_of(&a).unwrap()).unwrap();
    let remote_b = mirror.resolve(index.identity_of(&b).unwrap()).unwrap();
    let (version_a, version_b) = (remote_a.version(), remote_b.version());

    controls.insert(1, &c).unwrap();
    let (ops, bytes, _) = ship(Some(&snapshot), &root, &index);
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        DiffOp::Insert {
            path,
            at: Position::Index(1),
            value: PatchValue::Object(payload),
        } => {
            assert_eq!(path, &Path::root().field("controls"));
            assert_eq!(Some(payload.id), index.identity_of(&c));
        }
        other => panic!("unexpected op {other:?}"),
    }

    mirror.apply_bytes(&bytes).unwrap();
    assert!(mirror.root().unwrap().structural_eq(&root));
    // Survivors are the same remote instances, untouched.
    let items = mirror.root().unwrap().list("controls").unwrap().to_vec();
    assert!(items[0].as_object().unwrap().ptr_eq(&remote_a));
    assert!(items[2].as_object().unwrap().ptr_eq(&remote_b));
    assert_eq!(remote_a.version(), version_a);
    assert_eq!(remote_b.version(), version_b);
}

#[test]
fn test_dangling_patch_is_skipped_not_raised() {
    let index = IdentityIndex::new();
    let root = page("first");
    let (_, _, snapshot) = ship(None, &root, &index);

    root.set_field("title", "second").unwrap();
    let (_, bytes, _) = ship(Some(&snapshot), &root, &index);

    // This receiver never saw the initial sync.
    let mut stranger = Mirror::new(registry());
    let outcome = stranger.apply_bytes(&bytes).unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.skipped, 1);
    assert!(stranger.root().is_none());
}

#[test]
fn test_removal_reports_disposed_identities() {
    let index = IdentityIndex::new();
    let mut mirror = Mirror::new(registry());
    let root = page("list");
    let doomed = button("gone", 0);
    doomed.set_field("child", button("inner", 0)).unwrap();
    root.list("controls").unwrap().push(&doomed).unwrap();

    let (_, bytes, snapshot) = ship(None, &root, &index);
    mirror.apply_bytes(&bytes).unwrap();
    let doomed_id = index.identity_of(&doomed).unwrap();
    assert!(mirror.resolve(doomed_id).is_some());

    root.list("controls").unwrap().clear().unwrap();
    let result = diff(Some(&snapshot), &root, &index);
    assert_eq!(result.changes.disposed.len(), 2);
    assert!(result.changes.disposed.contains(&doomed_id));

    let doc = encode(&result.changes).unwrap();
    assert_eq!(doc.disposed, result.changes.disposed);
    assert!(matches!(doc.root.ops[0], NodeOp::Replace { .. }));
    mirror.apply(&doc);
    assert!(mirror.resolve(doomed_id).is_none());
    assert!(mirror.root().unwrap().structural_eq(&root));
}
