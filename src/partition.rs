// src/partition.rs

use crate::error::{PlsError, PlsResult};
use log::{debug, warn};
use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Observation indices used for training and validation in one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub fold: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Assigns every observation (row of `y`) to one of `folds` cross-validation
/// folds. Returns the fold number in `[0, folds)` for each observation.
///
/// Non-stratified: the observation indices are shuffled and dealt round-robin,
/// so fold sizes differ by at most one.
///
/// Stratified: observations are grouped into classes, each class is shuffled
/// and dealt round-robin, so within a class fold sizes differ by at most one.
/// The dealing position carries over from one class to the next, which also
/// keeps the overall fold sizes within one of each other. Classes are:
/// - single response column: one class per distinct value;
/// - several response columns: the column holding the row's single nonzero value.
///
/// All randomness comes from `rng`, so a seeded generator gives a reproducible
/// partition.
///
/// # Errors
/// [`PlsError::Partition`] for fewer than 2 folds, or when stratification finds
/// a single class or a row with zero or several nonzero responses.
pub fn partition_dataset<R: Rng + ?Sized>(
    y: ArrayView2<f64>,
    folds: usize,
    stratified: bool,
    rng: &mut R,
) -> PlsResult<Vec<usize>> {
    let n_obs = y.nrows();
    if folds < 2 {
        return Err(PlsError::Partition(format!("at least 2 folds are required, got {}.", folds)));
    }

    let mut partition = vec![0usize; n_obs];
    if !stratified {
        let mut observation_indices: Vec<usize> = (0..n_obs).collect();
        observation_indices.shuffle(rng);
        for (position, &obs) in observation_indices.iter().enumerate() {
            partition[obs] = position % folds;
        }
        return Ok(partition);
    }

    let class_membership = class_membership(y)?;
    let mut class_indices: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (obs, &class) in class_membership.iter().enumerate() {
        class_indices.entry(class).or_default().push(obs);
    }
    if class_indices.len() < 2 {
        return Err(PlsError::Partition(
            "Stratified cross-validation was requested, but only one class was found.".to_string(),
        ));
    }

    let mut next_fold = 0usize;
    for (class, members) in class_indices.iter_mut() {
        if members.len() < folds {
            warn!(
                "Class {} occurs {} times, and will not appear in each of the {} folds.",
                class,
                members.len(),
                folds
            );
        }
        members.shuffle(rng);
        for &obs in members.iter() {
            partition[obs] = next_fold;
            next_fold = (next_fold + 1) % folds;
        }
    }
    debug!(
        "Stratified {} observations from {} classes into {} folds",
        n_obs,
        class_indices.len(),
        folds
    );
    Ok(partition)
}

/// Class index of every observation, for stratification.
fn class_membership(y: ArrayView2<f64>) -> PlsResult<Vec<usize>> {
    if y.ncols() == 1 {
        let column = y.column(0);
        let mut distinct: Vec<f64> = column.iter().copied().collect();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup_by(|a, b| a.total_cmp(b).is_eq());
        return Ok(column
            .iter()
            .map(|value| {
                distinct
                    .binary_search_by(|probe| probe.total_cmp(value))
                    .unwrap_or_default()
            })
            .collect());
    }

    y.rows()
        .into_iter()
        .enumerate()
        .map(|(obs, row)| {
            let mut nonzero = row.iter().enumerate().filter(|(_, v)| **v != 0.0).map(|(j, _)| j);
            match (nonzero.next(), nonzero.next()) {
                (Some(class), None) => Ok(class),
                (None, _) => Err(PlsError::Partition(format!(
                    "Stratified cross-validation was requested, but observation {} has no nonzero response, so its class cannot be determined.",
                    obs
                ))),
                (Some(_), Some(_)) => Err(PlsError::Partition(format!(
                    "Stratified cross-validation was requested, but observation {} has values for multiple response variables, so its class cannot be determined.",
                    obs
                ))),
            }
        })
        .collect()
}

/// Turns a partition into per-fold train/validation index sets.
pub fn split_folds(partition: &[usize], folds: usize) -> Vec<FoldSplit> {
    (0..folds)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..partition.len()).partition(|&obs| partition[obs] == fold);
            FoldSplit { fold, train, validation }
        })
        .collect()
}
