use statrs::function::gamma::ln_gamma;

//Relative slack when comparing hypergeometric point masses; matches the
//tolerance commonly used for the two-sided test
const REL_ERR: f64 = 1.0 + 1e-7;

fn ln_choose(n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_gamma(n as f64 + 1.0) - ln_gamma(k as f64 + 1.0) - ln_gamma((n - k) as f64 + 1.0)
}

///////////////////////////////
/// Two-sided Fisher exact test on the 2x2 table [[a,b],[c,d]].
/// Returns (odds ratio, p-value). The p-value sums all hypergeometric
/// outcomes with the observed margins that are no more likely than the
/// observed table
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64) -> (f64, f64) {
    let odds = if b * c > 0 {
        (a * d) as f64 / (b * c) as f64
    } else {
        f64::INFINITY
    };

    let n = a + b + c + d;
    if n == 0 {
        return (odds, 1.0);
    }
    let r1 = a + b; //margin of row 1
    let c1 = a + c; //margin of column 1

    //Support of the hypergeometric distribution for these margins
    let k_min = r1.saturating_sub(n - c1);
    let k_max = r1.min(c1);
    if k_min == k_max {
        return (odds, 1.0);
    }

    let ln_denom = ln_choose(n, r1);
    let pmf = |k: u64| (ln_choose(c1, k) + ln_choose(n - c1, r1 - k) - ln_denom).exp();

    let p_obs = pmf(a);
    let mut p = 0.0;
    for k in k_min..=k_max {
        let pk = pmf(k);
        if pk <= p_obs * REL_ERR {
            p += pk;
        }
    }

    (odds, p.min(1.0))
}

/// Outcome of the multiple-testing correction for one p-value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub p_adjusted: f64,
    pub reject: bool,
}

///////////////////////////////
/// Benjamini-Hochberg FDR step-up over a set of p-values.
/// Output is aligned with the input order; reject means the null is
/// rejected at level alpha
pub fn fdr_bh(pvals: &[f64], alpha: f64) -> Vec<Correction> {
    let n = pvals.len();
    if n == 0 {
        return Vec::new();
    }

    //Sort indices by p ascending
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| pvals[i].total_cmp(&pvals[j]));

    //Step up from the largest p, keeping the running minimum
    let mut adjusted = vec![0.0f64; n];
    let mut running = 1.0f64;
    for rank in (0..n).rev() {
        let idx = order[rank];
        let adj = (pvals[idx] * n as f64 / (rank + 1) as f64).min(running);
        running = adj;
        adjusted[idx] = adj;
    }

    adjusted
        .into_iter()
        .map(|p_adjusted| Correction {
            p_adjusted,
            reject: p_adjusted <= alpha,
        })
        .collect()
}
