use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;
use slipfit_algorithms::{
    CalibrationSession, OptimizationResult, Optimizer, PanelGroup, Parameter, ParameterSpec,
    ParameterVector, RefineConfig, RefineJob, RefineMode, Refiner,
};
use slipfit_core::{
    Crystal, DiffractionImage, ImageId, PanelArena, PanelGeometry, PanelId, RayTracePredictor,
    Reflection, ScoringConfig, Vec3,
};

const WAVELENGTH: f64 = 1e-10;

fn geometry() -> PanelGeometry {
    PanelGeometry {
        cnx: -100.0,
        cny: -100.0,
        clen: 0.1,
        coffset: 0.0,
        res: 10_000.0,
        fs: Vec3::x(),
        ss: Vec3::y(),
        width: 200,
        height: 200,
    }
}

fn indexed_image(id: usize) -> DiffractionImage {
    let g = geometry();
    let mut image = DiffractionImage::new(ImageId(id), WAVELENGTH);
    let mut crystal = Crystal::default();
    for (fs, ss) in [(25.0, 40.0), (80.0, 170.0), (150.0, 90.0), (110.0, 20.0)] {
        image.push_peak(PanelId(0), fs, ss, 2_000.0);
        crystal.reflections.push(Reflection {
            indices: [1, 2, 3],
            panel: PanelId(0),
            fs,
            ss,
            intensity: 2_000.0,
            scattering: g.reciprocal_position(fs, ss, WAVELENGTH),
        });
    }
    image.crystals.push(crystal);
    image
}

/// Holds the worker until the test releases it.
struct GatedOptimizer(Mutex<Receiver<()>>);

impl Optimizer for GatedOptimizer {
    fn minimize(
        &self,
        start: ParameterVector,
        _specs: &[ParameterSpec],
        objective: &mut dyn FnMut(&ParameterVector) -> f64,
    ) -> OptimizationResult {
        let _ = self.0.lock().unwrap().recv();
        OptimizationResult {
            params: start,
            score: objective(&start),
            evaluations: 1,
            cycles: 0,
        }
    }

    fn name(&self) -> &'static str {
        "Gated"
    }
}

fn job(panels: &Arc<RwLock<PanelArena>>) -> RefineJob {
    RefineJob {
        group: PanelGroup::leaf(PanelId(0)),
        panels: Arc::clone(panels),
        mode: RefineMode::Intra,
        scoring: ScoringConfig::default(),
        crystallography: Arc::new(RayTracePredictor),
    }
}

#[test]
fn test_second_request_is_refused_while_running() {
    let panels = Arc::new(RwLock::new(
        PanelArena::from_geometries([("a", geometry())]).unwrap(),
    ));
    let (release, gate) = channel();
    let refiner = Refiner::with_optimizer(
        RefineConfig::default(),
        Arc::new(GatedOptimizer(Mutex::new(gate))),
    );

    let handle = refiner.start(job(&panels)).ok().unwrap();
    assert!(refiner.is_running());

    let refused = refiner.start(job(&panels)).err().unwrap();
    assert_eq!(refused.group.panel_ids(), vec![PanelId(0)]);

    release.send(()).unwrap();
    let outcome = handle.wait().unwrap();
    assert!(outcome.report.is_ok());
    assert!(!refiner.is_running());

    // The slot is free again.
    release.send(()).unwrap();
    let again = refiner.start(job(&panels)).ok().unwrap();
    assert!(again.wait().unwrap().report.is_ok());
}

#[test]
fn test_inter_refinement_recovers_slide() {
    let arena = PanelArena::from_geometries([("a", geometry())]).unwrap();
    let mut session = CalibrationSession::new(arena)
        .with_scoring(ScoringConfig::default().with_pairing_start_index(0))
        .unwrap();
    session.load_images([indexed_image(0), indexed_image(1)]).unwrap();
    session.toggle_selection(PanelId(0)).unwrap();
    session.supply_images_to_selection().unwrap();

    // Knock the panel ~1.5 pixels out of place.
    session.set_parameter(Parameter::Horiz, 1.5e-3).unwrap();
    let report = session.refine(RefineMode::Inter).unwrap();

    assert!(report.final_score < report.initial_score);
    assert!(report.params.horiz.abs() < 1.5e-3);
    assert!(report.cycles <= 40);
    assert!(!session.is_refining());

    let selection = session.selection().unwrap();
    assert_eq!(selection.params(), &report.params);
}

#[test]
fn test_refinement_leaves_panels_nudged_to_best() {
    let arena = PanelArena::from_geometries([("a", geometry())]).unwrap();
    let mut session = CalibrationSession::new(arena);
    session.load_images([indexed_image(0)]).unwrap();
    session.toggle_selection(PanelId(0)).unwrap();
    session.supply_images_to_selection().unwrap();
    session.set_parameter(Parameter::Radius, 1e-3).unwrap();

    let report = session.refine(RefineMode::Intra).unwrap();
    let best = report.params;

    let mut reference = PanelArena::from_geometries([("a", geometry())]).unwrap();
    let mut group = PanelGroup::leaf(PanelId(0));
    group.set_params(best);
    group.nudge_panels(&mut reference).unwrap();

    let live = session.panels().read().get(PanelId(0)).unwrap().geometry().clone();
    assert_eq!(&live, reference.get(PanelId(0)).unwrap().geometry());

    session.accept().unwrap();
    let panels = session.panels().read();
    let panel = panels.get(PanelId(0)).unwrap();
    assert_eq!(panel.backup(), &live);
}

#[test]
fn test_polled_round_frees_the_refiner() {
    let arena = PanelArena::from_geometries([("a", geometry())]).unwrap();
    let mut session = CalibrationSession::new(arena)
        .with_refine_config(RefineConfig::default().with_cycles(2));
    session.load_images([indexed_image(0)]).unwrap();
    session.toggle_selection(PanelId(0)).unwrap();
    session.supply_images_to_selection().unwrap();

    assert!(session.start_refinement(RefineMode::Intra).unwrap());
    let report = loop {
        if let Some(report) = session.poll_refinement() {
            break report.unwrap();
        }
        std::thread::yield_now();
    };
    assert_eq!(report.mode, RefineMode::Intra);
    assert!(!session.is_refining());

    // The next round starts straight away.
    assert!(session.start_refinement(RefineMode::Inter).unwrap());
    assert!(session.wait_refinement().unwrap().is_ok());
}

#[test]
fn test_refining_while_busy_is_ignored() {
    let arena = PanelArena::from_geometries([("a", geometry())]).unwrap();
    let mut session = CalibrationSession::new(arena)
        .with_refine_config(RefineConfig::default().with_cycles(2));
    session.load_images([indexed_image(0)]).unwrap();
    session.toggle_selection(PanelId(0)).unwrap();
    session.supply_images_to_selection().unwrap();

    assert!(session.start_refinement(RefineMode::Intra).unwrap());
    assert!(!session.start_refinement(RefineMode::Inter).unwrap());
    assert!(session.selection().is_err());

    let report = session.wait_refinement().unwrap().unwrap();
    assert_eq!(report.mode, RefineMode::Intra);
    assert!(session.selection().is_ok());
    assert!(session.poll_refinement().is_none());
}
