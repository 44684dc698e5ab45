//! # Counting Worker
//!
//! A [`RangeCounter`] returns the number of primes in an inclusive range. It
//! must be a pure function of its input: workers may run it on any thread,
//! more than once, and in any order.
//!
//! Two implementations are provided:
//!
//! - [`SegmentedSieve`] - the default. Sieves the range in fixed-size
//!   segments using base primes up to `sqrt(end)`, so memory stays bounded
//!   regardless of the range width.
//! - [`TrialDivision`] - a slow `6k ± 1` trial division counter used as a
//!   cross-check reference.
//!
//! Any `Fn(u64, u64) -> u64` closure is also a [`RangeCounter`], which makes
//! it easy to inject faulty counters in tests.

/// Number of integers sieved per segment.
const SEGMENT_LEN: u64 = 1 << 15;

/// Counts primes in an inclusive range.
pub trait RangeCounter: Send + Sync + 'static {
    /// Returns the number of primes `p` with `start <= p <= end`.
    ///
    /// Returns `0` when `start > end`.
    fn count(&self, start: u64, end: u64) -> u64;
}

impl<F> RangeCounter for F
where
    F: Fn(u64, u64) -> u64 + Send + Sync + 'static,
{
    fn count(&self, start: u64, end: u64) -> u64 {
        self(start, end)
    }
}

/// Segmented sieve of Eratosthenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentedSieve;

impl RangeCounter for SegmentedSieve {
    fn count(&self, start: u64, end: u64) -> u64 {
        count_primes_in_range(start, end)
    }
}

/// Trial division counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrialDivision;

impl RangeCounter for TrialDivision {
    fn count(&self, start: u64, end: u64) -> u64 {
        if start > end {
            return 0;
        }
        (start..=end).filter(|&n| is_prime(n)).count() as u64
    }
}

/// Primality test by trial division over `6k ± 1` candidates.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i <= n / i {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Counts primes in `[start, end]` with a segmented sieve.
pub fn count_primes_in_range(start: u64, end: u64) -> u64 {
    let lo = start.max(2);
    if lo > end {
        return 0;
    }

    let base = base_primes(end.isqrt());
    let mut composite = Vec::with_capacity(SEGMENT_LEN.min(end - lo + 1) as usize);
    let mut count = 0;
    let mut seg_lo = lo;

    loop {
        let seg_hi = end.min(seg_lo.saturating_add(SEGMENT_LEN - 1));
        composite.clear();
        composite.resize((seg_hi - seg_lo + 1) as usize, false);

        for &p in &base {
            let square = p * p;
            if square > seg_hi {
                break;
            }
            // Never mark `p` itself: start at p² or the first multiple in range.
            let mut m = square.max(seg_lo.div_ceil(p) * p);
            while m <= seg_hi {
                composite[(m - seg_lo) as usize] = true;
                m += p;
            }
        }

        count += composite.iter().filter(|&&c| !c).count() as u64;

        if seg_hi == end {
            break;
        }
        seg_lo = seg_hi + 1;
    }

    count
}

/// All primes `<= limit` via a plain sieve.
fn base_primes(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }
    let limit = limit as usize;
    let mut is_composite = vec![false; limit + 1];
    let mut primes = Vec::new();
    for i in 2..=limit {
        if is_composite[i] {
            continue;
        }
        primes.push(i as u64);
        let mut j = i * i;
        while j <= limit {
            is_composite[j] = true;
            j += i;
        }
    }
    primes
}
