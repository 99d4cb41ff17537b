use integrate_pipeline::classify::{recover, FaultClassification, Patch, PRESERVED_LOG};
use integrate_pipeline::deck::{ParameterDeck, JOB_INTEGRATE};
use integrate_pipeline::error::IntegrateError;
use integrate_pipeline::invoker::{ToolInvoker, LOG_FILE};
use integrate_pipeline::launcher::Launcher;
use integrate_pipeline::sink::NullProgress;
use std::cell::Cell;
use std::fs;
use std::path::Path;

/// Writes the same log on every launch and counts launches.
struct CannedXds {
    log: &'static str,
    runs: Cell<u32>,
}

impl CannedXds {
    fn new(log: &'static str) -> Self {
        Self {
            log,
            runs: Cell::new(0),
        }
    }
}

impl Launcher for CannedXds {
    fn launch(&self, workdir: &Path, _command: &str, log_name: &str) -> Result<(), IntegrateError> {
        self.runs.set(self.runs.get() + 1);
        fs::write(workdir.join(log_name), self.log)?;
        Ok(())
    }
}

const CLEAN_LOG: &str = " ***** IDXREF *****\n refinement fully converged\n";
const INACCURATE_LOG: &str =
    " !!! ERROR !!! INSUFFICIENT PERCENTAGE (< 50%) OF INDEXED REFLECTIONS\n";

fn index_deck() -> ParameterDeck {
    ParameterDeck::from_lines(["JOB=IDXREF", "DATA_RANGE=1 20", "SPOT_RANGE=1 10"])
}

#[test]
fn patched_fault_is_rerun_exactly_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(LOG_FILE), INACCURATE_LOG).expect("write log");
    let xds = CannedXds::new(CLEAN_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();

    let outcome = recover(&invoker, temp.path(), &mut deck).expect("recover");

    assert_eq!(xds.runs.get(), 1);
    assert_eq!(outcome.patches, vec![Patch::IntegrateDespiteIndexing]);
    assert_eq!(outcome.classification, FaultClassification::Finished);
    assert_eq!(deck.job(), Some("DEFPIX INTEGRATE CORRECT"));
    let preserved = fs::read_to_string(temp.path().join(PRESERVED_LOG)).expect("read preserved");
    assert_eq!(preserved, INACCURATE_LOG);
    let inp = fs::read_to_string(temp.path().join("XDS.INP")).expect("read deck");
    assert!(inp.contains(JOB_INTEGRATE));
}

#[test]
fn repeated_fault_settles_as_warning() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(LOG_FILE), INACCURATE_LOG).expect("write log");
    let xds = CannedXds::new(INACCURATE_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();

    let outcome = recover(&invoker, temp.path(), &mut deck).expect("recover");

    assert_eq!(xds.runs.get(), 1);
    assert_eq!(outcome.patches.len(), 1);
    assert!(matches!(
        outcome.classification,
        FaultClassification::RecoverableWarning {
            rule: "inaccurate_indexing",
            ..
        }
    ));
    assert!(outcome.warning().is_some());
}

#[test]
fn geometry_fault_extends_spot_range() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(LOG_FILE),
        " !!! ERROR !!! CANNOT CONTINUE WITH A TWO DIMENSION LATTICE BASIS\n",
    )
    .expect("write log");
    let xds = CannedXds::new(CLEAN_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();

    let outcome = recover(&invoker, temp.path(), &mut deck).expect("recover");

    assert_eq!(xds.runs.get(), 1);
    assert_eq!(
        outcome.patches,
        vec![Patch::ExtendSpotRange { first: 1, last: 11 }]
    );
    assert_eq!(deck.spot_range(), Some((1, 11)));
}

#[test]
fn unknown_fault_is_not_rerun() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(LOG_FILE),
        " !!! ERROR !!! ILLEGAL DETECTOR SEGMENT DEFINITION\n",
    )
    .expect("write log");
    let xds = CannedXds::new(CLEAN_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();
    let before = deck.clone();

    let err = recover(&invoker, temp.path(), &mut deck).unwrap_err();

    assert_eq!(xds.runs.get(), 0);
    assert_eq!(deck, before);
    match err {
        IntegrateError::UnknownFault { line, .. } => {
            assert!(line.contains("ILLEGAL DETECTOR SEGMENT"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn fault_after_converged_phase_stops_recovery() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(LOG_FILE),
        " IDXREF refinement fully converged\n ***** INTEGRATE *****\n !!! ERROR !!! ILLEGAL DETECTOR SEGMENT DEFINITION\n",
    )
    .expect("write log");
    let xds = CannedXds::new(CLEAN_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();

    let err = recover(&invoker, temp.path(), &mut deck).unwrap_err();

    assert_eq!(xds.runs.get(), 0);
    assert!(matches!(err, IntegrateError::UnknownFault { .. }));
}

#[test]
fn missing_log_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let xds = CannedXds::new(CLEAN_LOG);
    let invoker = ToolInvoker::new(&xds, &NullProgress, "xds_par");
    let mut deck = index_deck();

    let err = recover(&invoker, temp.path(), &mut deck).unwrap_err();
    assert!(matches!(err, IntegrateError::MissingOutput { .. }));
}
