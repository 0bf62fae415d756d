//! Grouping pruned files into bounded scan tasks.
//!
//! Pure bin packing: no I/O happens here. Oversized files are first exploded
//! into byte-range splits no larger than the target size; splits are then
//! packed into tasks first-fit over a bounded window of open candidate bins
//! (the lookback). Each split weighs at least the open-file cost, which
//! keeps tasks from accumulating arbitrarily many tiny files.

use std::collections::VecDeque;

use super::{FileScanTask, ScanTask};

/// Group file splits into scan tasks bounded by `split_size`.
pub(crate) fn plan_tasks(
    files: Vec<FileScanTask>,
    split_size: i64,
    lookback: usize,
    open_file_cost: i64,
) -> Vec<ScanTask> {
    let split_size = split_size.max(1);
    let lookback = lookback.max(1);
    let splits = split_oversized(files, split_size);

    let mut tasks = Vec::new();
    let mut bins: VecDeque<Bin> = VecDeque::new();

    'splits: for split in splits {
        let weight = split.length.max(open_file_cost);
        for bin in bins.iter_mut() {
            if bin.weight + weight <= split_size {
                bin.add(split, weight);
                continue 'splits;
            }
        }
        // no open bin has room; retire the oldest when the window is full
        if bins.len() >= lookback {
            // lookback >= 1, so there is a bin to retire
            tasks.push(bins.pop_front().unwrap().into_task());
        }
        let mut bin = Bin::new();
        bin.add(split, weight);
        bins.push_back(bin);
    }

    tasks.extend(bins.into_iter().map(Bin::into_task));
    tasks
}

/// Explode files larger than the target size into byte-range splits.
fn split_oversized(files: Vec<FileScanTask>, split_size: i64) -> Vec<FileScanTask> {
    let mut splits = Vec::with_capacity(files.len());
    for file in files {
        if file.length <= split_size {
            splits.push(file);
            continue;
        }
        let mut offset = file.start;
        let end = file.start + file.length;
        while offset < end {
            let length = split_size.min(end - offset);
            splits.push(FileScanTask {
                start: offset,
                length,
                ..file.clone()
            });
            offset += length;
        }
    }
    splits
}

struct Bin {
    splits: Vec<FileScanTask>,
    weight: i64,
}

impl Bin {
    fn new() -> Self {
        Bin {
            splits: Vec::new(),
            weight: 0,
        }
    }

    fn add(&mut self, split: FileScanTask, weight: i64) {
        self.weight += weight;
        self.splits.push(split);
    }

    fn into_task(self) -> ScanTask {
        ScanTask { files: self.splits }
    }
}
