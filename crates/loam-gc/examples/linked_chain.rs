//! Build a linked chain of records, drop the root, and watch the collector
//! reclaim it. Run with `RUST_LOG=debug` for collection tracing.

use loam_gc::{
    FieldLabel, GcCause, GcConfig, GcHeap, Mutator, Record, RootAcceptor, RootProvider,
    RootSection, SlotAcceptor, Value,
};

struct ChainRoot {
    head: Value,
}

impl RootProvider for ChainRoot {
    fn mark_roots(&mut self, acceptor: &mut dyn RootAcceptor, _include_long_lived: bool) {
        acceptor.begin_section(RootSection::Custom);
        acceptor.accept_value(&mut self.head, FieldLabel::Named("head"));
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut heap = GcHeap::new(GcConfig::default().with_name("chain-demo"));
    let mut roots = ChainRoot { head: Value::Null };

    for i in 0..100_000u32 {
        let node = Record::create(&mut Mutator::new(&mut heap, &mut roots), 2);
        Record::set(&mut heap, node, 0, roots.head);
        Record::set(&mut heap, node, 1, Value::Number(f64::from(i)));
        roots.head = Value::Cell(node);
    }
    println!(
        "built chain: {} cells, {} bytes",
        heap.num_cells(),
        heap.heap_info().allocated_bytes
    );

    roots.head = Value::Null;
    Mutator::new(&mut heap, &mut roots).collect(GcCause::Forced);
    println!(
        "after drop + collect: {} cells, {} bytes",
        heap.num_cells(),
        heap.heap_info().allocated_bytes
    );

    let mut stats = Vec::new();
    heap.print_stats(&mut stats).unwrap();
    println!("{}", String::from_utf8(stats).unwrap());
}
