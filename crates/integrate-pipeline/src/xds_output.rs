//! Readers for the XDS output files the controller inspects.

use serde::{Deserialize, Serialize};

pub const COLSPOT_LP: &str = "COLSPOT.LP";
pub const IDXREF_LP: &str = "IDXREF.LP";
pub const INTEGRATE_LP: &str = "INTEGRATE.LP";
pub const CORRECT_LP: &str = "CORRECT.LP";
pub const XPARM: &str = "XPARM.XDS";
pub const GXPARM: &str = "GXPARM.XDS";
pub const ASCII_HKL: &str = "XDS_ASCII.HKL";

/// Refined geometry from `XPARM.XDS` / `GXPARM.XDS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XParm {
    pub starting_frame: u32,
    pub starting_angle: f64,
    pub osc_range: f64,
    pub rotation_axis: [f64; 3],
    pub wavelength: f64,
    pub incident_beam: [f64; 3],
    pub spacegroup: u32,
    pub unit_cell: [f64; 6],
    pub detector_segments: u32,
    pub nx: u32,
    pub ny: u32,
    pub pixel_size: [f64; 2],
    pub orgx: f64,
    pub orgy: f64,
    pub distance: f64,
}

impl XParm {
    pub fn parse(src: &str) -> Result<Self, String> {
        let lines: Vec<Vec<&str>> = src
            .lines()
            .map(|line| line.split_whitespace().collect())
            .collect();
        if lines.len() < 9 {
            return Err(format!("XPARM too short: {} lines", lines.len()));
        }
        let frame_line = &lines[1];
        let beam_line = &lines[2];
        let cell_line = &lines[3];
        let detector_line = &lines[7];
        let origin_line = &lines[8];

        Ok(XParm {
            starting_frame: field(frame_line, 0, "starting frame")?,
            starting_angle: field(frame_line, 1, "starting angle")?,
            osc_range: field(frame_line, 2, "oscillation range")?,
            rotation_axis: floats(frame_line, 3, "rotation axis")?,
            wavelength: field(beam_line, 0, "wavelength")?,
            incident_beam: floats(beam_line, 1, "incident beam")?,
            spacegroup: field(cell_line, 0, "spacegroup")?,
            unit_cell: floats(cell_line, 1, "unit cell")?,
            detector_segments: field(detector_line, 0, "segments")?,
            nx: field(detector_line, 1, "nx")?,
            ny: field(detector_line, 2, "ny")?,
            pixel_size: floats(detector_line, 3, "pixel size")?,
            orgx: field(origin_line, 0, "orgx")?,
            orgy: field(origin_line, 1, "orgy")?,
            distance: field(origin_line, 2, "distance")?,
        })
    }
}

fn field<T: std::str::FromStr>(tokens: &[&str], index: usize, name: &str) -> Result<T, String> {
    tokens
        .get(index)
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| format!("XPARM: missing or invalid {name}"))
}

fn floats<const N: usize>(tokens: &[&str], start: usize, name: &str) -> Result<[f64; N], String> {
    let mut out = [0.0; N];
    for (offset, slot) in out.iter_mut().enumerate() {
        *slot = field(tokens, start + offset, name)?;
    }
    Ok(out)
}

/// Average mosaicity suggested by INTEGRATE: last token two lines below the
/// final `SUGGESTED VALUES FOR INPUT PARAMETERS` header.
pub fn mosaicity(integrate_lp: &str) -> Option<f64> {
    let lines: Vec<&str> = integrate_lp.lines().collect();
    let header = lines
        .iter()
        .rposition(|line| line.contains("SUGGESTED VALUES FOR INPUT PARAMETERS"))?;
    last_float(lines.get(header + 2)?)
}

/// ISa from the line under the `a  b  ISa` header in CORRECT.LP.
pub fn isa(correct_lp: &str) -> Option<f64> {
    let lines: Vec<&str> = correct_lp.lines().collect();
    let header = lines
        .iter()
        .position(|line| line.split_whitespace().last() == Some("ISa"))?;
    last_float(lines.get(header + 1)?)
}

/// Reduced cell of the first lattice marked `*` with the given Bravais code
/// in the IDXREF lattice character table.
pub fn idxref_cell(idxref_lp: &str, bravais: &str) -> Option<[f64; 6]> {
    idxref_lp.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 10 || tokens[0] != "*" || tokens[2] != bravais {
            return None;
        }
        let mut cell = [0.0; 6];
        for (slot, token) in cell.iter_mut().zip(&tokens[4..10]) {
            *slot = token.parse().ok()?;
        }
        Some(cell)
    })
}

fn last_float(line: &str) -> Option<f64> {
    line.split_whitespace().last()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GXPARM_SRC: &str = " XPARM.XDS    VERSION Feb 5, 2021  BUILT=20210323
         1        0.0000        0.2000  0.999998  0.001575 -0.001067
       0.979180       0.000012       0.000004       1.021266
    96    57.8210    57.8210   150.1542  90.000  90.000  90.000
      18.093224      54.920113       0.120144
     -54.917984      18.091660       0.595201
      -0.559424      -1.520451     150.145294
         1      2463      2527    0.172000    0.172000
    1222.467468    1266.049438     299.674316
       1.000000       0.000000       0.000000
       0.000000       1.000000       0.000000
       0.000000       0.000000       1.000000
";

    #[test]
    fn parses_gxparm_geometry() {
        let xparm = XParm::parse(GXPARM_SRC).expect("parse xparm");
        assert_eq!(xparm.starting_frame, 1);
        assert_eq!(xparm.osc_range, 0.2);
        assert_eq!(xparm.spacegroup, 96);
        assert_eq!(xparm.unit_cell, [57.821, 57.821, 150.1542, 90.0, 90.0, 90.0]);
        assert_eq!(xparm.nx, 2463);
        assert_eq!(xparm.pixel_size, [0.172, 0.172]);
        assert_eq!(xparm.distance, 299.674316);
    }

    #[test]
    fn truncated_xparm_is_an_error() {
        let err = XParm::parse(" XPARM.XDS\n 1 0.0 0.2\n").unwrap_err();
        assert!(err.contains("too short"));
    }

    #[test]
    fn reads_mosaicity_and_isa() {
        let integrate = " SUGGESTED VALUES FOR INPUT PARAMETERS\n ---\n BEAM_DIVERGENCE=   0.03  BEAM_DIVERGENCE_E.S.D.=   0.003\n\
 REFLECTING_RANGE=  0.2 REFLECTING_RANGE_E.S.D.=   0.101\n SUGGESTED VALUES FOR INPUT PARAMETERS\n\n REFLECTING_RANGE=  0.2 REFLECTING_RANGE_E.S.D.=   0.095\n";
        assert_eq!(mosaicity(integrate), Some(0.095));

        let correct = "     a        b          ISa\n 1.034E+00  3.058E-03   17.77\n";
        assert_eq!(isa(correct), Some(17.77));
        assert_eq!(isa("no table here\n"), None);
    }

    #[test]
    fn finds_starred_lattice_cell() {
        let idxref = "\
 LATTICE-  BRAVAIS-   QUALITY  UNIT CELL CONSTANTS (ANGSTROEM & DEGREES)
 CHARACTER  LATTICE     OF FIT      a      b      c   alpha  beta gamma

 *  44        aP          0.0      57.8   57.8  150.2  90.0  90.0  90.0
 *  21        tP          1.2      57.8   57.8  150.2  90.0  90.0  90.0
    13        oC        250.0      81.8   81.7  150.2  90.0  90.0  90.1
";
        assert_eq!(
            idxref_cell(idxref, "tP"),
            Some([57.8, 57.8, 150.2, 90.0, 90.0, 90.0])
        );
        assert_eq!(idxref_cell(idxref, "oC"), None);
    }
}
