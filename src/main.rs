use anyhow::{Context, Error, Result};
use clap::Parser;
use colstore::catalog::schema::TypeId;
use colstore::common::{BLOCK_SIZE, PRIMARY_KEY_COLUMN};
use colstore::storage::block::{initialize_raw_block, BlockHeader};
use colstore::storage::block_store::BlockStore;
use colstore::storage::layout::BlockLayout;
use colstore::storage::tuple_access::TupleAccessStrategy;

/// Prints the geometry of the blocks storing tuples with the given attributes
#[derive(Parser)]
struct LayoutConfig {
    #[arg(
        long,
        value_delimiter = ',',
        help = "Attribute sizes in bytes, primary key column first"
    )]
    attr_sizes: Vec<u8>,

    #[arg(
        long,
        value_delimiter = ',',
        conflicts_with = "attr_sizes",
        help = "Column types (e.g. BigInt,Integer,Boolean), primary key column first"
    )]
    types: Vec<String>,

    #[arg(long, default_value_t = BLOCK_SIZE, help = "Size of a block in bytes")]
    block_size: u32,

    #[arg(long, help = "Initialize a block and allocate every slot in it")]
    fill: bool,
}

impl LayoutConfig {
    fn attr_sizes(&self) -> Result<Vec<u8>> {
        if !self.attr_sizes.is_empty() {
            return Ok(self.attr_sizes.clone());
        }
        if self.types.is_empty() {
            return Err(Error::msg("Expected either --attr-sizes or --types"));
        }
        self.types
            .iter()
            .map(|type_name| {
                type_name
                    .parse::<TypeId>()
                    .map(|type_id| type_id.size())
                    .with_context(|| format!("Unknown column type {type_name}"))
            })
            .collect()
    }
}

fn print_layout(layout: &BlockLayout) {
    println!("block size:  {}", layout.block_size());
    println!("attributes:  {}", layout.num_attrs());
    println!("tuple size:  {}", layout.tuple_size());
    println!("header size: {}", layout.header_size());
    println!("slots:       {}", layout.num_slots());
    println!("bitmap size: {}", layout.bitmap_size());
    for column in 0..layout.num_attrs() {
        println!(
            "  column {:>5}: {:>3} bytes at offset {:>8} ({} bytes)",
            column,
            layout.attr_size(column),
            layout.column_offset(column),
            layout.mini_block_size(column)
        );
    }
    println!("unused:      {}", layout.block_size() - layout.content_end());
}

fn fill_block(layout: BlockLayout) -> Result<()> {
    let store = BlockStore::new(layout.block_size(), 1);
    let strategy = TupleAccessStrategy::new(layout);
    let (block_id, mut block) = store.get()?;
    initialize_raw_block(&mut block, strategy.layout(), block_id);

    let view = strategy
        .view(&block)
        .with_context(|| format!("Block {block_id} does not match its own layout"))?;
    let mut allocated = 0;
    while let Some(slot) = view.allocate() {
        let key = vec![0xff; strategy.layout().attr_size(PRIMARY_KEY_COLUMN) as usize];
        view.access_force_not_null(PRIMARY_KEY_COLUMN, slot).write(&key);
        allocated += 1;
    }
    BlockHeader::new(&block).set_num_records(allocated);

    println!(
        "block {} filled with {} tuples, {} slots occupied",
        block_id,
        BlockHeader::new(&block).num_records(),
        view.occupied()
    );
    store.release(block);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = LayoutConfig::parse();
    let layout = BlockLayout::with_block_size(config.block_size, config.attr_sizes()?)
        .with_context(|| "Failed to compute block layout".to_string())?;

    print_layout(&layout);
    if config.fill {
        fill_block(layout)?;
    }
    Ok(())
}
