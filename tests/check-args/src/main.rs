// SPDX-License-Identifier: MIT

//! Checks the argument envelope it was started with.
//!
//! Usage: `check-args <launch key> [KEY=VALUE ...] <envelope>`
//!
//! Exits 0 when the envelope decodes with the launch key to exactly the
//! listed pairs, in order.  Exits 1 when the command line is not in that
//! shape, 2 when the envelope does not decode, and 3 when the pairs differ.

use sandbox_broker::ArgumentBuilder;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("expected a launch key and an envelope, got {args:?}");
        std::process::exit(1);
    }
    let (key, envelope) = (&args[0], &args[args.len() - 1]);
    let Some(key) = key.strip_prefix("0x").and_then(|k| u32::from_str_radix(k, 16).ok()) else {
        eprintln!("bad launch key {key:?}");
        std::process::exit(1);
    };

    let mut expected = ArgumentBuilder::new();
    for pair in &args[1..args.len() - 1] {
        let Some((k, v)) = pair.split_once('=') else {
            eprintln!("bad pair {pair:?}");
            std::process::exit(1);
        };
        expected.push(k, v);
    }

    let decoded = match ArgumentBuilder::decode(envelope, key) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("could not decode {envelope:?}: {e}");
            std::process::exit(2);
        }
    };
    if decoded != expected {
        eprintln!("decoded {:?}, expected {:?}", decoded.arguments(), expected.arguments());
        std::process::exit(3);
    }
}
