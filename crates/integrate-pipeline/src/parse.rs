//! Text parsers for the aimless log: the result summary, the resolution
//! estimates and the loggraph `$TABLE` blocks used for plots.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Overall, inner shell and outer shell values of one summary row. A `-`
/// in the log becomes `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellValues {
    pub overall: Option<f64>,
    pub inner: Option<f64>,
    pub outer: Option<f64>,
}

impl ShellValues {
    fn from_tokens(tokens: &[&str]) -> Self {
        let value = |index: usize| tokens.get(index).and_then(|token| token.parse().ok());
        ShellValues {
            overall: value(0),
            inner: value(1),
            outer: value(2),
        }
    }

    fn is_empty(&self) -> bool {
        self.overall.is_none() && self.inner.is_none() && self.outer.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AimlessSummary {
    pub bins_low: ShellValues,
    pub bins_high: ShellValues,
    pub rmerge_anom: ShellValues,
    pub rmerge_norm: ShellValues,
    pub rmeas_anom: ShellValues,
    pub rmeas_norm: ShellValues,
    pub rpim_anom: ShellValues,
    pub rpim_norm: ShellValues,
    pub rmerge_top: ShellValues,
    pub total_obs: ShellValues,
    pub unique_obs: ShellValues,
    pub isigi: ShellValues,
    pub cc_half: ShellValues,
    pub completeness: ShellValues,
    pub multiplicity: ShellValues,
    pub anom_completeness: ShellValues,
    pub anom_multiplicity: ShellValues,
    pub anom_correlation: ShellValues,
    pub anom_slope: ShellValues,
    pub scaling_spacegroup: Option<String>,
    pub unit_cell: Option<[f64; 6]>,
    pub anomalous_report: Option<String>,
}

impl AimlessSummary {
    /// Reads the result summary. Each statistic is taken from the first row
    /// whose label matches; labels are compared with whitespace collapsed.
    pub fn parse(log: &str) -> Result<Self, String> {
        let mut summary = AimlessSummary::default();
        for line in log.lines() {
            let trimmed = line.trim();
            if let Some((_, symbol)) = trimmed.split_once("Space group:") {
                summary.scaling_spacegroup = Some(symbol.trim().to_string());
                continue;
            }
            if trimmed.starts_with("Average unit cell:") {
                let cell: Vec<f64> = trimmed
                    .split_whitespace()
                    .skip(3)
                    .filter_map(|token| token.parse().ok())
                    .collect();
                if let Ok(cell) = <[f64; 6]>::try_from(cell) {
                    summary.unit_cell = Some(cell);
                }
                continue;
            }
            if trimmed.contains("Anomalous flag switched ON") {
                summary.anomalous_report = Some(trimmed.to_string());
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() < 4 {
                continue;
            }
            let split = tokens.len() - 3;
            let label = tokens[..split].join(" ");
            if let Some(slot) = summary.slot_mut(&label) {
                if slot.is_empty() {
                    *slot = ShellValues::from_tokens(&tokens[split..]);
                }
            }
        }
        if summary.bins_high.overall.is_none() {
            return Err("aimless summary has no high resolution limit".to_string());
        }
        Ok(summary)
    }

    fn slot_mut(&mut self, label: &str) -> Option<&mut ShellValues> {
        let slot = match label {
            "Low resolution limit" => &mut self.bins_low,
            "High resolution limit" => &mut self.bins_high,
            "Rmerge (within I+/I-)" => &mut self.rmerge_anom,
            "Rmerge (all I+ and I-)" => &mut self.rmerge_norm,
            "Rmeas (within I+/I-)" => &mut self.rmeas_anom,
            "Rmeas (all I+ & I-)" => &mut self.rmeas_norm,
            "Rpim (within I+/I-)" => &mut self.rpim_anom,
            "Rpim (all I+ & I-)" => &mut self.rpim_norm,
            "Rmerge in top intensity bin" => &mut self.rmerge_top,
            "Total number of observations" => &mut self.total_obs,
            "Total number unique" => &mut self.unique_obs,
            "Mean((I)/sd(I))" => &mut self.isigi,
            "Mn(I) half-set correlation CC(1/2)" => &mut self.cc_half,
            "Completeness" => &mut self.completeness,
            "Multiplicity" => &mut self.multiplicity,
            "Anomalous completeness" => &mut self.anom_completeness,
            "Anomalous multiplicity" => &mut self.anom_multiplicity,
            "DelAnom correlation between half-sets" => &mut self.anom_correlation,
            "Mid-Slope of Anom Normal Probability" => &mut self.anom_slope,
            _ => return None,
        };
        Some(slot)
    }
}

/// Resolution limits aimless suggests in its "Estimates of resolution limits"
/// block. Only the overall estimates (the first of each kind) are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEstimate {
    pub cc_half: Option<f64>,
    pub isigi: Option<f64>,
}

impl ResolutionEstimate {
    pub fn parse(log: &str) -> Result<Self, String> {
        let cc_half = Regex::new(r"from half-dataset correlation CC\(1/2\)\s*>\s*[\d.]+:\s*limit\s*=\s*([\d.]+)\s*A")
            .map_err(|err| err.to_string())?;
        let isigi = Regex::new(r"from Mn\(I/sd\)\s*>\s*[\d.]+:\s*limit\s*=\s*([\d.]+)\s*A")
            .map_err(|err| err.to_string())?;
        let first = |pattern: &Regex| {
            pattern
                .captures(log)
                .and_then(|captures| captures.get(1))
                .and_then(|value| value.as_str().parse().ok())
        };
        Ok(ResolutionEstimate {
            cc_half: first(&cc_half),
            isigi: first(&isigi),
        })
    }

    /// The finer (numerically smaller) of the two estimates.
    pub fn suggested(&self) -> Option<f64> {
        match (self.cc_half, self.isigi) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// One CCP4 loggraph table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogGraphTable {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LogGraphTable {
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|candidate| candidate == header)
    }

    /// Numeric `(x, y)` pairs; rows with a non-numeric cell in either column
    /// are skipped.
    pub fn points(&self, x: &str, y: &str) -> Option<Vec<[f64; 2]>> {
        let x = self.column(x)?;
        let y = self.column(y)?;
        let points = self
            .rows
            .iter()
            .filter_map(|row| {
                let xv: f64 = row.get(x)?.parse().ok()?;
                let yv: f64 = row.get(y)?.parse().ok()?;
                Some([xv, yv])
            })
            .collect();
        Some(points)
    }
}

/// Splits every `$TABLE:` block into headers (second `$$` section) and data
/// rows (fourth section).
pub fn loggraph_tables(log: &str) -> Vec<LogGraphTable> {
    let mut tables = Vec::new();
    let mut lines = log.lines();
    while let Some(line) = lines.next() {
        let Some(start) = line.find("$TABLE:") else {
            continue;
        };
        let title = line[start + "$TABLE:".len()..]
            .trim()
            .trim_end_matches(':')
            .trim()
            .to_string();
        let mut body = String::new();
        for next in lines.by_ref() {
            body.push_str(next);
            body.push('\n');
            if body.matches("$$").count() >= 4 {
                break;
            }
        }
        let sections: Vec<&str> = body.split("$$").collect();
        if sections.len() < 4 {
            continue;
        }
        let headers = sections[1].split_whitespace().map(str::to_string).collect();
        let rows = sections[3]
            .lines()
            .map(|row| row.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|row| !row.is_empty())
            .collect();
        tables.push(LogGraphTable {
            title,
            headers,
            rows,
        });
    }
    tables
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotDefinition {
    pub name: &'static str,
    /// Substring of the table title.
    pub table: &'static str,
    pub x: &'static str,
    pub y: &'static str,
}

pub const PLOTS: &[PlotDefinition] = &[
    PlotDefinition {
        name: "Rmerge vs Frame",
        table: "Analysis against all Batches",
        x: "Batch",
        y: "Rmerge",
    },
    PlotDefinition {
        name: "I/sigma, Mean Mn(I)/sd(Mn(I))",
        table: "Analysis against resolution",
        x: "1/d^2",
        y: "Mn(I/sd)",
    },
    PlotDefinition {
        name: "CC half",
        table: "Correlations CC(1/2)",
        x: "1/d^2",
        y: "CC1/2",
    },
    PlotDefinition {
        name: "Completeness",
        table: "Completeness & multiplicity",
        x: "1/d^2",
        y: "%poss",
    },
    PlotDefinition {
        name: "Redundancy",
        table: "Completeness & multiplicity",
        x: "1/d^2",
        y: "Mlplct",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    pub name: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<[f64; 2]>,
}

/// Builds every plot in [`PLOTS`] whose table and columns are present.
pub fn plot_series(tables: &[LogGraphTable]) -> Vec<PlotSeries> {
    PLOTS
        .iter()
        .filter_map(|plot| {
            let points = tables
                .iter()
                .filter(|table| table.title.contains(plot.table))
                .find_map(|table| table.points(plot.x, plot.y))?;
            Some(PlotSeries {
                name: plot.name.to_string(),
                x_label: plot.x.to_string(),
                y_label: plot.y.to_string(),
                points,
            })
        })
        .collect()
}
