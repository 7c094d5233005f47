//! Distance-quantile outlier cuts.
//!
//! All cuts share the same scheme: rank the items by a planar distance,
//! ascending, and drop the farthest `p` percent. The center of mass is
//! taken as the per-component median so the outliers being cut cannot
//! drag it. Output is a reordered subset of the input; a cut fraction
//! rounding down to zero items keeps everything.

use nalgebra::Vector2;
use ndarray::{Array2, ArrayView2, Axis};

use crate::stats::median;

fn cut_count(len: usize, cut_percent: f64) -> usize {
    (len as f64 * cut_percent / 100.0) as usize
}

fn sorted_keep<T>(mut scored: Vec<(f64, T)>, cut: usize) -> Vec<T> {
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let keep = scored.len().saturating_sub(cut);
    scored.truncate(keep);
    scored.into_iter().map(|(_, item)| item).collect()
}

/// Cut the farthest `cut_percent`% of items, measuring each item's x/y
/// distance from the median center of all keys.
pub fn quantile_cut_centered<T, F>(items: Vec<T>, cut_percent: f64, key: F) -> Vec<T>
where
    F: Fn(&T) -> Vector2<f64>,
{
    let n = items.len();
    let cut = cut_count(n, cut_percent);
    if cut_percent <= 0.0 || n == 0 || cut == 0 {
        return items;
    }

    let keys: Vec<Vector2<f64>> = items.iter().map(&key).collect();
    let xs: Vec<f64> = keys.iter().map(|k| k.x).collect();
    let ys: Vec<f64> = keys.iter().map(|k| k.y).collect();
    // Items all produced finite keys or would fail downstream anyway;
    // a fully non-finite key set degenerates to an uncentered cut.
    let cx = median(&xs).unwrap_or(0.0);
    let cy = median(&ys).unwrap_or(0.0);

    let scored = items
        .into_iter()
        .zip(keys)
        .map(|(item, k)| ((k.x - cx).powi(2) + (k.y - cy).powi(2), item))
        .collect();
    sorted_keep(scored, cut)
}

/// Cut the farthest `cut_percent`% of items, measuring the plain norm of
/// each key (distance from the origin, no centering).
pub fn quantile_cut_radial<T, F>(items: Vec<T>, cut_percent: f64, key: F) -> Vec<T>
where
    F: Fn(&T) -> Vector2<f64>,
{
    let n = items.len();
    let cut = cut_count(n, cut_percent);
    if cut_percent <= 0.0 || n == 0 || cut == 0 {
        return items;
    }

    let scored = items
        .into_iter()
        .map(|item| {
            let k = key(&item);
            (k.norm_squared(), item)
        })
        .collect();
    sorted_keep(scored, cut)
}

/// Outlier cut on hit-pair rows `[x1, y1, z1, x2, y2, z2]`.
///
/// Ranks pairs by the x/y distance between the two hits after shifting
/// the second hit by the median pair difference, so a systematic offset
/// between the two sensors does not count as outlier distance.
pub fn quantile_cut_pairs(pairs: ArrayView2<'_, f64>, cut_percent: f64) -> Array2<f64> {
    let n = pairs.nrows();
    let cut = cut_count(n, cut_percent);
    if cut_percent <= 0.0 || n == 0 || cut == 0 {
        return pairs.to_owned();
    }

    let dx: Vec<f64> = (0..n).map(|i| pairs[[i, 3]] - pairs[[i, 0]]).collect();
    let dy: Vec<f64> = (0..n).map(|i| pairs[[i, 4]] - pairs[[i, 1]]).collect();
    let mx = median(&dx).unwrap_or(0.0);
    let my = median(&dy).unwrap_or(0.0);

    let mut indices: Vec<usize> = (0..n).collect();
    let dist: Vec<f64> = (0..n)
        .map(|i| (dx[i] - mx).powi(2) + (dy[i] - my).powi(2))
        .collect();
    indices.sort_by(|&a, &b| dist[a].partial_cmp(&dist[b]).unwrap_or(std::cmp::Ordering::Equal));
    indices.truncate(n.saturating_sub(cut));

    pairs.select(Axis(0), &indices)
}
