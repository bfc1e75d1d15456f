//! Serial forward solves checked against closed-form answers.

use approx::assert_relative_eq;
use parafem::{
    AnalysisPhase, DesignVector, DofMap, KernelRegistry, MeshBuilder, MeshStore, NewtonConfig,
    NewtonSolver, SerialComm,
};

fn solve_bar(
    n_elems: usize,
    design_values: &[f64],
    tip_load: f64,
) -> parafem::Analysis {
    let _ = env_logger::builder().is_test(true).try_init();
    let mesh = MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, n_elems as f64), 1).unwrap();
    let registry = KernelRegistry::with_defaults();
    let mut dofs = DofMap::new(mesh.num_nodes(), 1);
    dofs.set_dirichlet(0, 0.0);
    let design = DesignVector::new(design_values);
    let mut load = vec![0.0; mesh.total_dofs()];
    load[n_elems] = tip_load;
    NewtonSolver::new(NewtonConfig::default())
        .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
        .unwrap()
}

#[test]
fn test_uniform_bar_tip_displacement() {
    // Unit-stiffness chain, unit element length, unit tip load:
    // u at node k is k * (P L_e / EA) = k
    let analysis = solve_bar(4, &[1.0; 4], 1.0);

    assert_eq!(analysis.phase, AnalysisPhase::Converged);
    assert_eq!(analysis.stats.iterations, 1);
    for node in 0..5 {
        assert_relative_eq!(analysis.state.u[node], node as f64, epsilon = 1e-10);
    }
}

#[test]
fn test_graded_stiffness_bar() {
    // Springs in series: u at node k is P * sum of 1/EA_e for e < k
    let ea = [1.0, 2.0, 4.0];
    let analysis = solve_bar(3, &ea, 2.0);

    let mut expected = 0.0;
    for (node, &stiffness) in ea.iter().enumerate() {
        assert_relative_eq!(analysis.state.u[node], expected, epsilon = 1e-10);
        expected += 2.0 / stiffness;
    }
    assert_relative_eq!(analysis.state.u[3], expected, epsilon = 1e-10);
}

#[test]
fn test_repeated_solve_is_bit_identical() {
    // Same inputs must reproduce the same result exactly, not just to
    // tolerance: element order and scatter order are deterministic.
    let first = solve_bar(8, &[1.5; 8], 0.75);
    let second = solve_bar(8, &[1.5; 8], 0.75);

    assert_eq!(first.state.u.len(), second.state.u.len());
    for (a, b) in first.state.u.iter().zip(second.state.u.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    assert_eq!(first.stats.residual_history.len(), second.stats.residual_history.len());
    for (a, b) in first.stats.residual_history.iter().zip(&second.stats.residual_history) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn test_unit_cube_under_tension() {
    let mesh = MeshStore::from_raw(MeshBuilder::unit_cube_tets(), 1).unwrap();
    let registry = KernelRegistry::with_defaults();
    let mut dofs = DofMap::new(mesh.num_nodes(), 3);
    // Clamp the bottom face, pull the top face in +z
    for node in 0..4 {
        dofs.set_dirichlet_node(node, 0.0);
    }
    let mut load = vec![0.0; mesh.total_dofs()];
    for node in 4..8 {
        load[dofs.global_dof(node, 2)] = 0.25;
    }
    let design = DesignVector::new(&[1.0]);

    let analysis = NewtonSolver::new(NewtonConfig::default())
        .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
        .unwrap();

    assert_eq!(analysis.phase, AnalysisPhase::Converged);
    assert!(analysis.system.is_symmetric(1e-10));
    for node in 4..8 {
        let uz = analysis.state.u[dofs.global_dof(node, 2)];
        assert!(uz > 0.0, "top node {} should move up, got {}", node, uz);
    }
    // Clamped nodes stay put
    for node in 0..4 {
        for comp in 0..3 {
            assert_relative_eq!(
                analysis.state.u[dofs.global_dof(node, comp)],
                0.0,
                epsilon = 1e-12
            );
        }
    }
}
