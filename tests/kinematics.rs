//! Inverse kinematics integration tests

use hrc_arm::kinematics::{
    AngleRange, ArmGeometry, JointAngles, JointLimits, Solver, TOLERANCE, WorkspacePoint,
};
use hrc_arm::{Error, JointTrajectory, PixelPoint};

mod common;

use common::scenario_calibration;

fn solver(l1: f64, l2: f64) -> Solver {
    Solver::new(ArmGeometry::new(l1, l2), JointLimits::default())
}

#[test]
fn test_forward_inverse_round_trip() {
    let solver = solver(0.15, 0.15);
    let mut checked = 0;

    for xi in 0..6 {
        for yi in 0..6 {
            for z in [-0.04, 0.0, 0.04] {
                let point = WorkspacePoint::new(
                    0.02 + f64::from(xi) * 0.05,
                    -0.12 + f64::from(yi) * 0.05,
                    z,
                );
                let reach = point.distance(&WorkspacePoint::new(0.0, 0.0, 0.0));
                if !(0.06..=0.29).contains(&reach) {
                    continue;
                }

                let angles = solver
                    .solve(point)
                    .unwrap_or_else(|e| panic!("{point:?} should be reachable: {e}"));
                let back = solver.forward(&angles);
                assert!(
                    back.distance(&point) < 1e-3,
                    "{point:?} -> {angles} -> {back:?}"
                );
                checked += 1;
            }
        }
    }

    assert!(checked > 50);
}

#[test]
fn test_reach_boundaries() {
    let solver = solver(0.2, 0.1);

    // Fully extended
    let angles = solver.solve(WorkspacePoint::new(0.3, 0.0, 0.0)).unwrap();
    assert!(angles.elbow.abs() < 1e-3);
    assert!(solver.forward(&angles).distance(&WorkspacePoint::new(0.3, 0.0, 0.0)) < 1e-6);

    // Fully folded
    let angles = solver.solve(WorkspacePoint::new(0.1, 0.0, 0.0)).unwrap();
    assert!((angles.elbow.abs() - 180.0).abs() < 1e-3);
    assert!(solver.forward(&angles).distance(&WorkspacePoint::new(0.1, 0.0, 0.0)) < 1e-6);

    assert!(matches!(
        solver.solve(WorkspacePoint::new(0.301, 0.0, 0.0)),
        Err(Error::Unreachable(_))
    ));
    assert!(matches!(
        solver.solve(WorkspacePoint::new(0.099, 0.0, 0.0)),
        Err(Error::Unreachable(_))
    ));
}

#[test]
fn test_reach_tolerance() {
    let solver = solver(0.2, 0.1);
    let at = |r: f64| solver.solve(WorkspacePoint::new(r, 0.0, 0.0));

    assert!(at(0.3 + 0.5 * TOLERANCE).is_ok());
    assert!(matches!(at(0.3 + 2.0 * TOLERANCE), Err(Error::Unreachable(_))));
    assert!(at(0.1 - 0.5 * TOLERANCE).is_ok());
    assert!(matches!(at(0.1 - 2.0 * TOLERANCE), Err(Error::Unreachable(_))));
}

#[test]
fn test_joint_limit_tolerance() {
    let range = AngleRange::new(0.0, 180.0);

    assert!(range.contains(-0.5 * TOLERANCE));
    assert!(range.contains(180.0 + 0.5 * TOLERANCE));
    assert!(!range.contains(-2.0 * TOLERANCE));
    assert!(!range.contains(180.0 + 2.0 * TOLERANCE));

    let mut limits = JointLimits::default();
    limits.elbow = range;
    assert!(limits.allows(&JointAngles::new(0.0, 45.0, -0.5 * TOLERANCE)));
    assert!(!limits.allows(&JointAngles::new(0.0, 45.0, -2.0 * TOLERANCE)));
}

#[test]
fn test_calibrated_pixel_reaches_workspace_point() {
    let model = scenario_calibration();
    let solver = model.solver();

    for pair in model.pairs() {
        let point = model.resolve(pair.pixel()).unwrap();
        assert!((point.x - pair.wx).abs() < 1e-9);
        assert!((point.y - pair.wy).abs() < 1e-9);

        let angles = solver.solve(point).unwrap();
        assert!(solver.forward(&angles).distance(&point) < 1e-3);
    }

    let point = model.resolve(PixelPoint::new(155.0, 105.0)).unwrap();
    let angles = solver.solve(point).unwrap();
    assert!(solver.forward(&angles).distance(&point) < 1e-3);
}

#[test]
fn test_planned_tap_respects_step_limit() {
    let model = scenario_calibration();
    let solver = model.solver();
    let touch = model.resolve(PixelPoint::new(155.0, 105.0)).unwrap();
    let hover = solver.solve(touch.raised(0.02)).unwrap();
    let contact = solver.solve(touch).unwrap();
    let home = JointAngles::new(0.0, 90.0, -90.0);

    let trajectory = JointTrajectory::plan(home, &[hover, contact, hover], 5.0, 90.0);
    let waypoints = trajectory.waypoints();

    let mut previous = home;
    for waypoint in waypoints {
        assert!(previous.max_delta(waypoint) <= 5.0 + 1e-9);
        previous = *waypoint;
    }
    assert_eq!(waypoints.last(), Some(&hover));
    assert!(waypoints.contains(&contact));
}
