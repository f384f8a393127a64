use super::{escape_bytes, unescape_bytes, EscapeError, Tree, TreeRef};
use quickcheck_macros::quickcheck;
use typed_arena::Arena;

fn list<'heap>(arena: &'heap Arena<Tree<'heap>>, items: &[TreeRef<'heap>]) -> TreeRef<'heap> {
    let mut result: TreeRef = arena.alloc(Tree::Nil);
    for &item in items.iter().rev() {
        result = arena.alloc(Tree::cons(item, result));
    }
    result
}

#[test]
fn equality_is_structural() {
    let arena = Arena::new();
    let a = list(
        &arena,
        &[arena.alloc(Tree::Nat64(1)), arena.alloc(Tree::Nat64(2))],
    );
    let b = list(
        &arena,
        &[arena.alloc(Tree::Nat64(1)), arena.alloc(Tree::Nat64(2))],
    );
    assert!(!std::ptr::eq(a, b));
    assert_eq!(a, b);

    let c = list(
        &arena,
        &[arena.alloc(Tree::Nat64(1)), arena.alloc(Tree::Nat64(3))],
    );
    assert_ne!(a, c);
}

#[test]
fn equality_distinguishes_variants() {
    let arena: Arena<Tree> = Arena::new();
    let nil = arena.alloc(Tree::Nil);
    let unit = arena.alloc(Tree::Unit);
    let zero = arena.alloc(Tree::Nat64(0));
    let fls = arena.alloc(Tree::Bool(false));
    assert_ne!(&*nil, &*unit);
    assert_ne!(&*zero, &*fls);
    assert_eq!(Tree::Symbol("x"), Tree::Symbol("x"));
    assert_ne!(Tree::Symbol("x"), Tree::String(b"x"));
}

#[test]
fn equality_handles_long_spines() {
    let arena = Arena::new();
    let mut a: TreeRef = arena.alloc(Tree::Nil);
    let mut b: TreeRef = arena.alloc(Tree::Nil);
    for i in 0..200_000u64 {
        a = arena.alloc(Tree::cons(arena.alloc(Tree::Nat64(i)), a));
        b = arena.alloc(Tree::cons(arena.alloc(Tree::Nat64(i)), b));
    }
    assert_eq!(a, b);
}

#[test]
fn display_renders_lists_and_pairs() {
    let arena = Arena::new();
    let inner = list(
        &arena,
        &[arena.alloc(Tree::Symbol("add")), arena.alloc(Tree::Nat64(2))],
    );
    let outer = list(&arena, &[arena.alloc(Tree::Symbol("f")), inner]);
    assert_eq!(outer.to_string(), "(f (add 2))");

    let pair = arena.alloc(Tree::cons(
        arena.alloc(Tree::Nat64(1)),
        arena.alloc(Tree::Nat64(2)),
    ));
    assert_eq!(pair.to_string(), "(1 . 2)");

    let improper = arena.alloc(Tree::cons(arena.alloc(Tree::Nat64(1)), pair));
    assert_eq!(improper.to_string(), "(1 1 . 2)");
}

#[test]
fn display_renders_atoms() {
    assert_eq!(Tree::Nil.to_string(), "()");
    assert_eq!(Tree::Unit.to_string(), "#unit");
    assert_eq!(Tree::Bool(true).to_string(), "#t");
    assert_eq!(Tree::Bool(false).to_string(), "#f");
    assert_eq!(Tree::Nat64(42).to_string(), "42");
    assert_eq!(Tree::Symbol("foo'").to_string(), "foo'");
    assert_eq!(Tree::String(b"a\"b\n").to_string(), "\"a\\\"b\\n\"");
}

#[test]
fn iter_list_stops_at_improper_tail() {
    let arena = Arena::new();
    let items = list(
        &arena,
        &[arena.alloc(Tree::Nat64(1)), arena.alloc(Tree::Nat64(2))],
    );
    let heads: Vec<String> = items.iter_list().map(|t| t.to_string()).collect();
    assert_eq!(heads, vec!["1", "2"]);

    let pair = arena.alloc(Tree::cons(
        arena.alloc(Tree::Nat64(1)),
        arena.alloc(Tree::Nat64(2)),
    ));
    assert_eq!(pair.iter_list().count(), 1);
}

#[test]
fn escape_covers_the_escape_set() {
    assert_eq!(escape_bytes(b"plain"), b"plain".to_vec());
    assert_eq!(
        escape_bytes(b"\\\"\x07\x08\x0c\n\r\t\x0b"),
        b"\\\\\\\"\\a\\b\\f\\n\\r\\t\\v".to_vec()
    );
}

#[test]
fn unescape_rejects_unknown_sequences() {
    assert_eq!(unescape_bytes(b"ok\\q"), Err(EscapeError { position: 2 }));
    assert_eq!(unescape_bytes(b"dangling\\"), Err(EscapeError { position: 8 }));
    assert_eq!(unescape_bytes(b"\\n").unwrap(), b"\n".to_vec());
}

#[quickcheck]
fn prop_escape_round_trips(bytes: Vec<u8>) -> bool {
    unescape_bytes(&escape_bytes(&bytes)) == Ok(bytes)
}
