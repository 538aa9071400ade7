use accurate::{sum::Klein, traits::*};

/// Useful enumerations for decay categories and collider types.
pub mod enums;
/// Physical constants and closed-form kinematic helpers.
pub mod functions;
/// Three- and four-vectors with the usual kinematic accessors and Lorentz boosts.
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// A simple struct which represents a histogram
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// The number of counts in each bin (can be `f64`s since these might be weighted counts)
    pub counts: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
}

impl Histogram {
    /// An empty histogram with evenly spaced `bins` over `range`.
    pub fn new(bins: usize, range: (f64, f64)) -> Self {
        assert!(bins > 0, "Number of bins must be greater than zero!");
        assert!(
            range.1 > range.0,
            "The lower edge of the range must be smaller than the upper edge!"
        );
        Self {
            counts: vec![0.0; bins],
            bin_edges: get_bin_edges(bins, range),
        }
    }

    /// An empty histogram whose bin edges grow geometrically by `ratio` from `range.0` until they
    /// cover `range.1`.
    pub fn log_binned(range: (f64, f64), ratio: f64) -> Self {
        assert!(range.0 > 0.0, "The lower edge of a log-binned range must be positive!");
        assert!(
            range.1 > range.0,
            "The lower edge of the range must be smaller than the upper edge!"
        );
        assert!(ratio > 1.0, "The bin ratio must be greater than one!");
        let bins = ((range.1 / range.0).ln() / ratio.ln()).ceil().max(1.0) as usize;
        Self {
            counts: vec![0.0; bins],
            bin_edges: (0..=bins).map(|i| range.0 * ratio.powi(i as i32)).collect(),
        }
    }

    /// Add `weight` to the bin containing `value`. Values outside the edges are dropped.
    pub fn fill(&mut self, value: f64, weight: f64) {
        let n = self.bin_edges.len();
        if !(value >= self.bin_edges[0] && value < self.bin_edges[n - 1]) {
            return;
        }
        let index = self.bin_edges.partition_point(|&edge| edge <= value) - 1;
        let last = self.counts.len() - 1;
        self.counts[index.min(last)] += weight;
    }

    /// Total content.
    pub fn sum(&self) -> f64 {
        let mut sum: Klein<f64> = Klein::zero();
        for &count in &self.counts {
            sum += count;
        }
        sum.sum()
    }

    fn center(&self, index: usize) -> f64 {
        0.5 * (self.bin_edges[index] + self.bin_edges[index + 1])
    }

    fn density(&self, index: usize) -> f64 {
        self.counts[index] / (self.bin_edges[index + 1] - self.bin_edges[index])
    }

    /// The centre of the bin with the largest content, or `None` if the histogram is empty.
    pub fn mode(&self) -> Option<f64> {
        let (index, max) = self
            .counts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if *max <= 0.0 {
            return None;
        }
        Some(self.center(index))
    }

    /// Position of the maximum of the density (content per unit width).
    ///
    /// A parabola is laid through the densest bin and its two neighbours, and its vertex is taken
    /// if it falls between the neighbouring bin centres. Otherwise, and for bins at either end,
    /// the bin centre is returned. `None` if the histogram is empty.
    pub fn peak(&self) -> Option<f64> {
        let n = self.counts.len();
        let (index, max) = (0..n)
            .map(|i| (i, self.density(i)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        if max <= 0.0 {
            return None;
        }
        if index == 0 || index == n - 1 {
            return Some(self.center(index));
        }
        let (xm, x0, xp) = (
            self.center(index - 1),
            self.center(index),
            self.center(index + 1),
        );
        let (ym, y0, yp) = (
            self.density(index - 1),
            max,
            self.density(index + 1),
        );
        let numerator =
            (x0 - xm).powi(2) * (y0 - yp) - (x0 - xp).powi(2) * (y0 - ym);
        let denominator = (x0 - xm) * (y0 - yp) - (x0 - xp) * (y0 - ym);
        let vertex = x0 - 0.5 * numerator / denominator;
        if vertex.is_finite() && (xm..=xp).contains(&vertex) {
            Some(vertex)
        } else {
            Some(x0)
        }
    }

    /// The value below which a fraction `p` of the content lies, interpolating linearly inside
    /// the bin where the cumulative sum crosses `p`. `None` if the histogram is empty.
    pub fn quantile(&self, p: f64) -> Option<f64> {
        assert!((0.0..=1.0).contains(&p), "Quantile must lie in [0, 1]!");
        let total = self.sum();
        if total <= 0.0 {
            return None;
        }
        let target = p * total;
        let mut cumulative = 0.0;
        for (index, &count) in self.counts.iter().enumerate() {
            if count > 0.0 && cumulative + count >= target {
                let fraction = ((target - cumulative) / count).clamp(0.0, 1.0);
                let (low, high) = (self.bin_edges[index], self.bin_edges[index + 1]);
                return Some(low + fraction * (high - low));
            }
            cumulative += count;
        }
        Some(self.bin_edges[self.bin_edges.len() - 1])
    }
}

/// A method which creates a histogram from some data by binning it with evenly spaced `bins` within
/// the given `range`
pub fn histogram<T: AsRef<[f64]>>(
    values: T,
    bins: usize,
    range: (f64, f64),
    weights: Option<T>,
) -> Histogram {
    if let Some(w) = &weights {
        assert_eq!(
            values.as_ref().len(),
            w.as_ref().len(),
            "`values` and `weights` must have the same length!"
        );
    }
    let mut hist = Histogram::new(bins, range);
    for (i, &value) in values.as_ref().iter().enumerate() {
        let weight = weights.as_ref().map_or(1.0, |w| w.as_ref()[i]);
        hist.fill(value, weight);
    }
    hist
}
