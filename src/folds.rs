use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do with classes that have fewer samples than there are folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SparseClassPolicy {
    /// Refuse to split.
    #[default]
    Fail,
    /// Drop the class from every fold.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled stratified k-fold splitter.
///
/// Each class is shuffled and dealt round-robin over the folds, continuing
/// from where the previous class stopped, so per-class counts and total fold
/// sizes both differ by at most one between folds.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    folds: usize,
    policy: SparseClassPolicy,
}

impl StratifiedKFold {
    pub fn new(folds: usize, policy: SparseClassPolicy) -> Result<Self> {
        if folds < 2 {
            return Err(Error::InvalidFoldCount(folds));
        }
        Ok(Self { folds, policy })
    }

    pub fn split<R: Rng + ?Sized>(&self, labels: &[u32], rng: &mut R) -> Result<Vec<Fold>> {
        let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(idx);
        }

        let mut retained = Vec::with_capacity(by_class.len());
        for (label, members) in by_class {
            if members.len() >= self.folds {
                retained.push(members);
                continue;
            }
            match self.policy {
                SparseClassPolicy::Fail => {
                    return Err(Error::SparseClass {
                        label,
                        count: members.len(),
                        folds: self.folds,
                    })
                }
                SparseClassPolicy::Exclude => log::warn!(
                    "Excluding class {} ({} sample(s) < {} folds)",
                    label,
                    members.len(),
                    self.folds
                ),
            }
        }
        if retained.len() < 2 {
            return Err(Error::TooFewClasses(retained.len()));
        }

        let mut assignment: Vec<Option<usize>> = vec![None; labels.len()];
        let mut offset = 0;
        for mut members in retained {
            members.shuffle(rng);
            for (j, &idx) in members.iter().enumerate() {
                assignment[idx] = Some((offset + j) % self.folds);
            }
            offset = (offset + members.len()) % self.folds;
        }

        let folds = (0..self.folds)
            .map(|k| {
                let mut fold = Fold {
                    train: Vec::new(),
                    test: Vec::new(),
                };
                for (idx, slot) in assignment.iter().enumerate() {
                    match slot {
                        Some(f) if *f == k => fold.test.push(idx),
                        Some(_) => fold.train.push(idx),
                        None => {}
                    }
                }
                fold
            })
            .collect();
        Ok(folds)
    }
}
