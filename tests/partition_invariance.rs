//! Partitioned runs must produce the same numbers as serial runs, and
//! partition failures must surface on every rank.

use std::time::Duration;

use approx::assert_relative_eq;
use parafem::{
    Assembler, DesignVector, DofMap, FemError, GlobalSystem, KernelRegistry, LinearSolverKind,
    MeshBuilder, MeshStore, NewtonConfig, NewtonSolver, PartitionGroup, SerialComm,
};

fn dense(system: &GlobalSystem) -> Vec<Vec<f64>> {
    let n = system.n();
    let mut out = vec![vec![0.0; n]; n];
    for (i, row) in system.matrix.outer_iterator().enumerate() {
        for (j, &v) in row.iter() {
            out[i][j] += v;
        }
    }
    out
}

fn bar_inputs(n_elems: usize) -> (KernelRegistry, DofMap, DesignVector, Vec<f64>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = KernelRegistry::with_defaults();
    let mut dofs = DofMap::new(n_elems + 1, 1);
    dofs.set_dirichlet(0, 0.0);
    let design = DesignVector::new(&vec![1.0; n_elems]);
    let mut load = vec![0.0; n_elems + 1];
    load[n_elems] = 1.0;
    (registry, dofs, design, load)
}

#[test]
fn test_assembled_system_is_partition_invariant() {
    let n_elems = 9;
    let (registry, dofs, design, load) = bar_inputs(n_elems);
    let state = vec![0.0; n_elems + 1];

    let serial_mesh = MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, 9.0), 1).unwrap();
    let serial = Assembler::assemble(
        &serial_mesh,
        &registry,
        &dofs,
        &state,
        &design,
        &load,
        &SerialComm::new(),
    )
    .unwrap();
    let serial_dense = dense(&serial);

    for num_partitions in [2, 3] {
        let mesh =
            MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, 9.0), num_partitions).unwrap();
        let group = PartitionGroup::new(num_partitions, Duration::from_millis(5000));
        let results = group.run(|comm| {
            Assembler::assemble(&mesh, &registry, &dofs, &state, &design, &load, &comm)
        });

        // Merge owner rows across ranks into one global picture
        let systems: Vec<GlobalSystem> = results.into_iter().map(|r| r.unwrap()).collect();
        let parts = mesh.partitions();
        for dof in 0..serial.n() {
            let owner = parts.dof_owner(dof);
            let owner_dense = dense(&systems[owner]);
            for col in 0..serial.n() {
                assert_relative_eq!(
                    owner_dense[dof][col],
                    serial_dense[dof][col],
                    epsilon = 1e-10
                );
            }
            assert_relative_eq!(systems[owner].rhs[dof], serial.rhs[dof], epsilon = 1e-10);
        }
    }
}

#[test]
fn test_solution_is_partition_invariant() {
    let n_elems = 8;
    let (registry, dofs, design, load) = bar_inputs(n_elems);

    let serial_mesh = MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, 8.0), 1).unwrap();
    let serial = NewtonSolver::new(NewtonConfig::default())
        .solve(&serial_mesh, &registry, &dofs, &design, &load, &SerialComm::new())
        .unwrap();

    let mesh = MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, 8.0), 4).unwrap();
    let config = NewtonConfig {
        linear_solver: LinearSolverKind::ConjugateGradient,
        ..NewtonConfig::default()
    };
    let group = PartitionGroup::new(4, Duration::from_millis(5000));
    let results = group.run(|comm| {
        NewtonSolver::new(config.clone())
            .solve(&mesh, &registry, &dofs, &design, &load, &comm)
            .map(|analysis| analysis.state.u)
    });

    for result in results {
        let u = result.unwrap();
        for dof in 0..serial.state.u.len() {
            assert_relative_eq!(u[dof], serial.state.u[dof], epsilon = 1e-8);
        }
    }
}

#[test]
fn test_silent_partition_times_out_everywhere() {
    let group = PartitionGroup::new(3, Duration::from_millis(200));
    let results: Vec<Result<f64, FemError>> = group.run(|comm| {
        use parafem::Communicator;
        if comm.rank() == 1 {
            // This rank never joins the collective
            return Ok(0.0);
        }
        comm.allreduce_sum(1.0)
    });

    assert!(results[1].is_ok());
    for rank in [0, 2] {
        match &results[rank] {
            Err(FemError::CollectiveTimeout { rank: r, .. }) => assert_eq!(*r, rank),
            other => panic!("rank {} expected CollectiveTimeout, got {:?}", rank, other),
        }
    }
}

#[test]
fn test_topology_disagreement_surfaces_on_both_ranks() {
    // The two ranks are given meshes that disagree on where the
    // partition boundary sits, so the halo handshake must fail.
    let mesh_a = MeshStore::from_raw(MeshBuilder::bar_chain(4, 4.0), 2).unwrap();
    let mesh_b = MeshStore::from_raw(MeshBuilder::bar_chain(6, 6.0), 2).unwrap();
    let registry = KernelRegistry::with_defaults();

    let group = PartitionGroup::new(2, Duration::from_millis(2000));
    let results = group.run(|comm| {
        use parafem::Communicator;
        let mesh = if comm.rank() == 0 { &mesh_a } else { &mesh_b };
        let mut dofs = DofMap::new(mesh.num_nodes(), 1);
        dofs.set_dirichlet(0, 0.0);
        let design = DesignVector::new(&vec![1.0; mesh.num_elements()]);
        let state = vec![0.0; mesh.total_dofs()];
        let load = vec![0.0; mesh.total_dofs()];
        Assembler::assemble(mesh, &registry, &dofs, &state, &design, &load, &comm)
    });

    for result in results {
        assert!(matches!(result, Err(FemError::PartitionMismatch { .. })));
    }
}
