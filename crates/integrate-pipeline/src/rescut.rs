//! Resolution cutoff from the last statistics table in `CORRECT.LP`.

const RESOLUTION_COLUMN: usize = 0;
const ISIGI_COLUMN: usize = 8;

/// Walks the last `total`-terminated shell table from the finest shell
/// upward and returns the resolution where I/sigma reaches `target`.
///
/// The cutoff is interpolated between the first shell meeting the target and
/// the finer shell before it, rounded to 0.01 A. A table whose finest shell
/// already meets the target, or that never reaches it, yields `None`.
pub fn find_cutoff(correct_lp: &str, target: f64) -> Option<f64> {
    let lines: Vec<&str> = correct_lp.lines().collect();
    let total = lines
        .iter()
        .rposition(|line| line.trim_start().starts_with("total"))?;

    let mut finer: Option<(f64, f64)> = None;
    for line in lines[..total].iter().rev() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            break;
        };
        if !first.starts_with(|ch: char| ch.is_ascii_digit()) {
            break;
        }
        let Some(resolution) = tokens
            .get(RESOLUTION_COLUMN)
            .and_then(|token| token.parse::<f64>().ok())
        else {
            break;
        };
        let Some(isigi) = tokens
            .get(ISIGI_COLUMN)
            .and_then(|token| token.parse::<f64>().ok())
        else {
            continue;
        };
        if isigi >= target {
            // Data already strong at the edge: nothing to cut.
            let (finer_resolution, finer_isigi) = finer?;
            let fraction = (target - finer_isigi) / (isigi - finer_isigi);
            let cutoff = finer_resolution + fraction * (resolution - finer_resolution);
            return Some((cutoff * 100.0).round() / 100.0);
        }
        finer = Some((resolution, isigi));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(f64, &str)]) -> String {
        let mut out = String::from(
            " SUBSET OF INTENSITY DATA WITH SIGNAL/NOISE >= -3.0 AS FUNCTION OF RESOLUTION\n\
 RESOLUTION     NUMBER OF REFLECTIONS    COMPLETENESS R-FACTOR  R-FACTOR COMPARED I/SIGMA   R-meas  CC(1/2)\n\
   LIMIT     OBSERVED  UNIQUE  POSSIBLE     OF DATA   observed  expected\n\n",
        );
        for (resolution, isigi) in rows {
            out.push_str(&format!(
                "    {resolution:5.2}       4958     728       731       99.6%       3.0%      3.4%     4958  {isigi:>6}      3.3%    99.9*\n"
            ));
        }
        out.push_str("    total      193254   27731     27798       99.8%       5.5%      5.8%   193254   21.30      6.0%    99.9*\n");
        out
    }

    #[test]
    fn interpolates_between_bracketing_shells() {
        let lp = table(&[(4.0, "20.0"), (3.0, "2.0"), (2.5, "1.5"), (2.0, "0.5")]);
        // finer (2.0, 0.5), coarser (2.5, 1.5): target 1.0 sits halfway
        assert_eq!(find_cutoff(&lp, 1.0), Some(2.25));
        // finer (2.5, 1.5), coarser (3.0, 2.0): 1.8 is 60% of the way
        assert_eq!(find_cutoff(&lp, 1.8), Some(2.8));
    }

    #[test]
    fn finest_shell_above_target_gives_no_cutoff() {
        let lp = table(&[(3.0, "12.0"), (2.0, "4.0")]);
        assert_eq!(find_cutoff(&lp, 1.0), None);
    }

    #[test]
    fn skipped_finest_row_does_not_count_as_a_crossing() {
        let lp = table(&[(3.0, "12.0"), (2.5, "0.4"), (2.0, "*****")]);
        // (2.0, *****) is skipped, so (2.5, 0.4) is the finest usable shell
        assert_eq!(find_cutoff(&lp, 1.0), Some(2.53));
    }

    #[test]
    fn no_crossing_yields_none() {
        let lp = table(&[(3.0, "0.8"), (2.0, "0.2")]);
        assert_eq!(find_cutoff(&lp, 1.0), None);
        assert_eq!(find_cutoff("no statistics here\n", 1.0), None);
    }

    #[test]
    fn non_numeric_signal_rows_are_skipped() {
        let lp = table(&[(3.0, "3.0"), (2.5, "*****"), (2.0, "0.0")]);
        // (2.5, *****) is ignored so the bracket is (2.0, 0.0) .. (3.0, 3.0)
        assert_eq!(find_cutoff(&lp, 1.5), Some(2.5));
    }

    #[test]
    fn uses_the_last_table_in_the_file() {
        let mut lp = table(&[(3.0, "9.0"), (2.0, "0.0")]);
        lp.push_str(&table(&[(3.0, "2.0"), (2.0, "0.0")]));
        assert_eq!(find_cutoff(&lp, 1.0), Some(2.5));
    }
}
