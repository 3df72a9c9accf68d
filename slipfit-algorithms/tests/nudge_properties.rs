use approx::assert_relative_eq;
use slipfit_algorithms::{Parameter, ParameterVector, PanelGroup};
use slipfit_core::{PanelArena, PanelGeometry, PanelId, Vec3};

fn panel(cnx: f64, cny: f64, clen: f64) -> PanelGeometry {
    PanelGeometry {
        cnx,
        cny,
        clen,
        coffset: 0.0,
        res: 10_000.0,
        fs: Vec3::x(),
        ss: Vec3::y(),
        width: 64,
        height: 128,
    }
}

/// Two panels either side of the beam at 100 mm.
fn detector() -> PanelArena {
    PanelArena::from_geometries([
        ("left", panel(-300.0, -64.0, 0.1)),
        ("right", panel(236.0, -64.0, 0.1)),
    ])
    .unwrap()
}

fn trial() -> ParameterVector {
    ParameterVector {
        radius: 2e-4,
        alpha: 3e-3,
        beta: -1e-3,
        horiz: 5e-4,
        vert: -7e-4,
        gamma: 1e-2,
    }
}

#[test]
fn test_nudge_twice_equals_once() {
    let mut arena = detector();
    let mut group = PanelGroup::of_panels([PanelId(0), PanelId(1)]);
    group.set_params(trial());

    group.nudge_panels(&mut arena).unwrap();
    let once: Vec<_> = arena.iter().map(|p| p.geometry().clone()).collect();
    group.nudge_panels(&mut arena).unwrap();
    let twice: Vec<_> = arena.iter().map(|p| p.geometry().clone()).collect();

    assert_eq!(once, twice);
}

#[test]
fn test_zero_parameters_restore_backup() {
    let mut arena = detector();
    let mut group = PanelGroup::of_panels([PanelId(0), PanelId(1)]);
    group.set_params(trial());
    group.nudge_panels(&mut arena).unwrap();

    group.set_params(ParameterVector::zero());
    group.nudge_panels(&mut arena).unwrap();

    for panel in arena.iter() {
        assert_eq!(panel.geometry(), panel.backup());
    }
}

#[test]
fn test_live_geometry_depends_only_on_parameters() {
    let mut arena = detector();
    let mut group = PanelGroup::leaf(PanelId(1));

    // Walk through several trial values, then land on the target.
    for step in [1e-3, -2e-3, 5e-4] {
        group.set_parameter(Parameter::Vert, step);
        group.nudge_panels(&mut arena).unwrap();
    }
    group.set_parameter(Parameter::Vert, 2e-3);
    group.nudge_panels(&mut arena).unwrap();
    let walked = arena.get(PanelId(1)).unwrap().geometry().clone();

    let mut fresh = detector();
    let mut direct = PanelGroup::leaf(PanelId(1));
    direct.set_parameter(Parameter::Vert, 2e-3);
    direct.nudge_panels(&mut fresh).unwrap();

    assert_eq!(&walked, fresh.get(PanelId(1)).unwrap().geometry());
}

#[test]
fn test_accept_then_reset_keeps_nudge() {
    let mut arena = detector();
    let mut group = PanelGroup::of_panels([PanelId(0), PanelId(1)]);
    group.set_params(trial());
    group.nudge_panels(&mut arena).unwrap();
    let nudged: Vec<_> = arena.iter().map(|p| p.geometry().clone()).collect();

    group.accept_nudges(&mut arena).unwrap();
    assert!(group.params().is_zero());

    // A zero-parameter nudge now reproduces the committed geometry.
    group.nudge_panels(&mut arena).unwrap();
    let after: Vec<_> = arena.iter().map(|p| p.geometry().clone()).collect();
    assert_eq!(nudged, after);
    for panel in arena.iter() {
        assert_eq!(panel.geometry(), panel.backup());
    }
}

#[test]
fn test_discard_restores_backup() {
    let mut arena = detector();
    let original: Vec<_> = arena.iter().map(|p| p.backup().clone()).collect();
    let mut group = PanelGroup::of_panels([PanelId(0)]);
    group.set_params(trial());
    group.nudge_panels(&mut arena).unwrap();
    assert_ne!(arena.get(PanelId(0)).unwrap().geometry(), &original[0]);

    group.discard_nudges(&mut arena).unwrap();
    assert!(group.params().is_zero());
    assert_eq!(arena.get(PanelId(0)).unwrap().geometry(), &original[0]);
}

#[test]
fn test_composite_centroid_averages_children() {
    let arena = PanelArena::from_geometries([
        ("near", panel(-32.0, -64.0, 1.0)),
        ("far", panel(-32.0, -64.0, 3.0)),
    ])
    .unwrap();
    let group = PanelGroup::of_panels([PanelId(0), PanelId(1)]);
    let centroid = group.centroid(&arena).unwrap().unwrap();
    assert_relative_eq!(centroid, Vec3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
}

#[test]
fn test_group_radius_pushes_along_group_centroid() {
    let mut arena = detector();
    let mut group = PanelGroup::of_panels([PanelId(0), PanelId(1)]);
    let centroid = group.centroid(&arena).unwrap().unwrap();
    group.set_parameter(Parameter::Radius, 1e-3);
    group.nudge_panels(&mut arena).unwrap();

    // Every member moves by the same displacement.
    let direction = centroid.normalize();
    for panel in arena.iter() {
        let shift = panel.geometry().corner_metres() - panel.backup().corner_metres();
        assert_relative_eq!(shift, direction * 1e-3, epsilon = 1e-12);
    }
}

#[test]
fn test_split_preserves_parent_and_covers_it() {
    let mut arena = detector();
    let parent = arena.get(PanelId(0)).unwrap().backup().clone();
    let leaves = PanelGroup::leaf(PanelId(0)).split(&mut arena).unwrap();

    assert_eq!(leaves.len(), 4);
    assert_eq!(arena.len(), 6);
    assert_eq!(arena.get(PanelId(0)).unwrap().backup(), &parent);

    let area: u32 = leaves
        .iter()
        .flat_map(PanelGroup::panel_ids)
        .map(|id| {
            let g = arena.get(id).unwrap().backup();
            g.width * g.height
        })
        .sum();
    assert_eq!(area, parent.width * parent.height);

    // Quadrant 0 shares the parent's corner.
    let q0 = arena.get(PanelId(2)).unwrap().backup();
    assert_relative_eq!(q0.corner_metres(), parent.corner_metres(), epsilon = 1e-15);
    assert_eq!(arena.get(PanelId(2)).unwrap().name(), "leftq0");
}
