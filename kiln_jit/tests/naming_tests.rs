//! Unit names stay unique when translations race.

use kiln_bytecode::FunctionBuilder;
use kiln_jit::naming::{base_name, unique_name};
use kiln_jit::Translator;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const PER_THREAD: usize = 64;

#[test]
fn test_concurrent_names_are_unique() {
    let handles: Vec<_> = (0..THREADS)
        .map(|_| thread::spawn(|| (0..PER_THREAD).map(|_| unique_name("raced")).collect::<Vec<_>>()))
        .collect();
    let mut seen = FxHashSet::default();
    for handle in handles {
        for name in handle.join().unwrap() {
            assert_eq!(base_name(&name), "raced");
            assert!(seen.insert(name), "duplicate unit name");
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
    assert!(seen.contains("raced"));
}

#[test]
fn test_concurrent_translations_get_distinct_units() {
    let mut b = FunctionBuilder::new("shared_body");
    b.return_const(0);
    let code = Arc::new(b.finish().unwrap());
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let code = Arc::clone(&code);
            thread::spawn(move || {
                let unit = Translator::default().translate_unit(code).unwrap();
                Arc::clone(unit.name())
            })
        })
        .collect();
    let names: FxHashSet<Arc<str>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(names.len(), THREADS);
}
