use itertools::Itertools;
use std::hash::{BuildHasherDefault, Hash};
use std::io::{self, Write};

pub type HashMap<A, B> = std::collections::HashMap<A, B, BuildHasherDefault<rustc_hash::FxHasher>>;

pub fn new_hash_map<A, B>() -> HashMap<A, B> {
    rustc_hash::FxHashMap::default()
}

/// Number of pull request events seen per language label.
pub type Tally = HashMap<String, usize>;

/// Label used for events whose repository language can't be resolved.
pub const NO_LANG: &str = "no lang";

pub fn add_counts<A: Hash + Eq>(
    mut left_counts: HashMap<A, usize>,
    right_counts: HashMap<A, usize>,
) -> HashMap<A, usize> {
    // https://github.com/rust-lang/rfcs/pull/2593
    right_counts.into_iter().for_each(|(label, count)| {
        *left_counts.entry(label).or_default() += count;
    });
    left_counts
}

/// Sum any number of tallies key by key. Order of the inputs doesn't matter.
pub fn merge_tallies<I>(tallies: I) -> Tally
where
    I: IntoIterator<Item = Tally>,
{
    tallies.into_iter().fold(new_hash_map(), add_counts)
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Alphabetical by language label
    #[default]
    Key,
    /// Most frequent language first
    Count,
}

/// Print the tally as a JSON object with one entry per line.
pub fn write_tally<W: Write>(out: &mut W, tally: &Tally, order: Order) -> io::Result<()> {
    // Have to do this manually to keep the ordering :(
    let mut entries = tally.iter().sorted_by(|(la, ca), (lb, cb)| match order {
        Order::Key => la.cmp(lb),
        Order::Count => cb.cmp(ca).then_with(|| la.cmp(lb)),
    });

    write!(out, "{{")?;
    if let Some((label, count)) = entries.next() {
        write!(out, "\n  {}: {}", serde_json::to_string(label)?, count)?;
    }
    for (label, count) in entries {
        write!(out, ",\n  {}: {}", serde_json::to_string(label)?, count)?;
    }
    if tally.is_empty() {
        writeln!(out, "}}")
    } else {
        writeln!(out, "\n}}")
    }
}
