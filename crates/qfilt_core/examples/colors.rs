//! Sizing analysis and a small filter walk-through.

use qfilt_core::{Config, Filter};

fn main() {
    // helper routines are available to size a quotient filter correctly
    println!("Example of analyzing size requirements:");
    let conf = Config {
        expected_entries: 1_000_000_000,
        ..Config::default()
    };
    println!(
        "A billion entry quotient filter would be loaded at {:.1} percent...",
        conf.expected_loading()
    );
    print!("{}", conf.explain_indent("  "));

    println!("\nExample of loading and using a small quotient filter:");
    let data = ["red", "yellow", "orange", "blue"];
    // pre-size the filter when the entry count is known ahead of time;
    // otherwise just use Filter::new()
    let mut qf = Filter::with_config(Config {
        expected_entries: data.len() as u64,
        // the bit-packed table is somewhat slower to probe, but the size
        // reduction can be great, especially for larger filters where many
        // hash bits are implicitly encoded in the bucket index
        bit_packed: true,
        ..Config::default()
    });

    for color in data {
        qf.insert(color.as_bytes());
    }

    for color in ["red", "orange", "yellow", "green", "blue", "indigo", "violet"] {
        println!("{color}: {}", qf.contains(color.as_bytes()));
    }

    // dump the whole table in textual form
    print!("{}", qf.debug_dump(true));

    let mut buf = Vec::new();
    let written = qf.write_to(&mut buf).unwrap();
    println!("filter serializes into {written} bytes");
}
