use crate::unit_tests::{set_field, with_continuity_fields};
use cvfem::algorithm::{
    create_assemble_elem_solver_algorithm, Algorithm, AssembleElemSolverAlgorithm, EffDiffFluxCoeffAlg, PassContext,
    ScatterStrategy, SST_F_ONE_BLENDING,
};
use cvfem::assembly::CsrLinearSystem;
use cvfem::error::ConfigError;
use cvfem::field::MemorySpace;
use cvfem::kernel::{ElemKernelVariant, KernelSpec, ScalarDiffElemKernel};
use cvfem::mesh::procedural::{
    create_unit_box_uniform_hex_mesh_3d, create_unit_box_uniform_tet_mesh_3d, create_unit_square_uniform_quad_mesh_2d,
    BLOCK_NAME,
};
use cvfem::mesh::{EntityStatus, MeshBuilder, MeshDb};
use cvfem::options::{SolutionOptions, TimeIntegrator};
use cvfem::scratch::{ElemDataRequests, StagingCounts};
use cvfem::topology::{Hex8, Quad4, Tet4, Topology, TopologyKind, Tri3};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::DMatrix;

/// Sets smooth, non-trivial values on every continuity field.
fn set_continuity_state(mesh: &mut MeshDb) {
    set_field(mesh, "velocity", |_, x, u| {
        for (d, u) in u.iter_mut().enumerate() {
            *u = (1.0 + d as f64) * x[0] - x[d] * x[d] + 0.3;
        }
    });
    set_field(mesh, "dpdx", |_, x, g| {
        for (d, g) in g.iter_mut().enumerate() {
            *g = 0.5 * x[d] - 0.1;
        }
    });
    set_field(mesh, "pressure", |_, x, p| p[0] = x.iter().map(|xi| xi * xi).sum::<f64>());
    set_field(mesh, "density", |_, x, rho| rho[0] = 1.0 + 0.2 * x[0]);
    set_field(mesh, "momentum_diag", |_, x, d| d[0] = 2.0 + x[1]);
}

fn assemble<T: Topology>(mesh: &MeshDb, specs: &[KernelSpec], strategy: ScatterStrategy) -> CsrLinearSystem {
    let options = SolutionOptions::default();
    let mut algorithm = AssembleElemSolverAlgorithm::<T>::new(mesh, BLOCK_NAME, &options, specs, strategy).unwrap();
    let mut system = CsrLinearSystem::from_mesh(mesh);
    let mut context = PassContext::new(mesh, TimeIntegrator::bdf2(0.01, 0.01)).with_linear_system(&mut system);
    algorithm.execute(&mut context).unwrap();
    system
}

fn check_global_conservation(system: &CsrLinearSystem) {
    let dense = DMatrix::from(system.matrix());
    let scale = 1.0 + system.rhs().amax() + dense.amax();
    assert_scalar_eq!(system.rhs().sum() / scale, 0.0, comp = abs, tol = 1e-12);
    for column in dense.column_iter() {
        assert_scalar_eq!(column.sum() / scale, 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn assembled_continuity_is_globally_conservative() {
    let mut quads = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(4), 2)
        .build()
        .unwrap();
    set_continuity_state(&mut quads);
    check_global_conservation(&assemble::<Quad4>(&quads, &[KernelSpec::ContinuityAdv], ScatterStrategy::Serial));

    let mut tets = with_continuity_fields(create_unit_box_uniform_tet_mesh_3d(2), 3)
        .build()
        .unwrap();
    set_continuity_state(&mut tets);
    check_global_conservation(&assemble::<Tet4>(&tets, &[KernelSpec::ContinuityAdv], ScatterStrategy::Serial));
}

#[test]
fn colored_scatter_matches_serial_scatter() {
    let mut mesh = with_continuity_fields(create_unit_box_uniform_hex_mesh_3d(4), 3)
        .field("temperature", 1, 0.0)
        .build()
        .unwrap();
    set_continuity_state(&mut mesh);
    set_field(&mut mesh, "temperature", |_, x, t| t[0] = x[0] * x[1] - x[2]);

    let specs = [
        KernelSpec::ContinuityAdv,
        KernelSpec::ScalarDiff {
            scalar: "temperature".to_string(),
            diff_flux_coeff: "density".to_string(),
        },
    ];
    let serial = assemble::<Hex8>(&mesh, &specs, ScatterStrategy::Serial);
    let colored = assemble::<Hex8>(&mesh, &specs, ScatterStrategy::Colored);

    let serial_dense = DMatrix::from(serial.matrix());
    let colored_dense = DMatrix::from(colored.matrix());
    assert_matrix_eq!(serial_dense, colored_dense, comp = abs, tol = 1e-12);
    assert_matrix_eq!(serial.rhs().clone(), colored.rhs().clone(), comp = abs, tol = 1e-12);
    check_global_conservation(&colored);
}

#[test]
fn coloring_is_node_disjoint() {
    let mesh = with_continuity_fields(create_unit_box_uniform_hex_mesh_3d(3), 3)
        .build()
        .unwrap();
    let algorithm = AssembleElemSolverAlgorithm::<Hex8>::new(
        &mesh,
        BLOCK_NAME,
        &SolutionOptions::default(),
        &[KernelSpec::ContinuityAdv],
        ScatterStrategy::Colored,
    )
    .unwrap();
    let block = &mesh.blocks()[0];
    assert_eq!(algorithm.coloring().num_elements(), 27);
    assert!(algorithm
        .coloring()
        .verify(|element| block.element_nodes(element))
        .is_ok());
}

#[test]
fn shared_requirements_are_staged_once_per_element() {
    let mut mesh = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(3), 2)
        .field("temperature", 1, 0.0)
        .field("conductivity", 1, 1.0)
        .build()
        .unwrap();
    set_continuity_state(&mut mesh);

    let staged_counts = |specs: &[KernelSpec]| -> StagingCounts {
        let mut algorithm = AssembleElemSolverAlgorithm::<Quad4>::new(
            &mesh,
            BLOCK_NAME,
            &SolutionOptions::default(),
            specs,
            ScatterStrategy::Colored,
        )
        .unwrap();
        let mut system = CsrLinearSystem::from_mesh(&mesh);
        let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(0.1)).with_linear_system(&mut system);
        algorithm.execute(&mut context).unwrap();
        // Counters describe the latest pass only
        algorithm.execute(&mut context).unwrap();
        algorithm.staging_counts()
    };

    // coordinates, velocity, density, pressure, momentum_diag and dpdx; area vectors and gradients
    let continuity = staged_counts(&[KernelSpec::ContinuityAdv]);
    assert_eq!(
        continuity,
        StagingCounts {
            elements_staged: 9,
            nodal_field_gathers: 9 * 6,
            master_element_evaluations: 9 * 2,
        }
    );

    // Diffusing pressure with density as coefficient needs nothing new
    let overlapping = staged_counts(&[
        KernelSpec::ContinuityAdv,
        KernelSpec::ScalarDiff {
            scalar: "pressure".to_string(),
            diff_flux_coeff: "density".to_string(),
        },
    ]);
    assert_eq!(overlapping, continuity);

    let extended = staged_counts(&[
        KernelSpec::ContinuityAdv,
        KernelSpec::ScalarDiff {
            scalar: "temperature".to_string(),
            diff_flux_coeff: "conductivity".to_string(),
        },
    ]);
    assert_eq!(extended.nodal_field_gathers, 9 * 8);
    assert_eq!(extended.master_element_evaluations, 9 * 2);
}

#[test]
fn ghosted_elements_are_not_assembled() {
    let mut mesh = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(2), 2)
        .build()
        .unwrap();
    let part = mesh.meta_data().get_part_ordinal(BLOCK_NAME).unwrap();
    mesh.block_mut(part)
        .unwrap()
        .set_element_status(3, EntityStatus::Ghosted);
    mesh.block_mut(part)
        .unwrap()
        .set_element_status(1, EntityStatus::OwnedShared);

    let mut algorithm = AssembleElemSolverAlgorithm::<Quad4>::new(
        &mesh,
        BLOCK_NAME,
        &SolutionOptions::default(),
        &[KernelSpec::ContinuityAdv],
        ScatterStrategy::Serial,
    )
    .unwrap();
    assert_eq!(algorithm.selected_elements(), &[0, 1, 2]);

    mesh.block_mut(part)
        .unwrap()
        .set_element_status(3, EntityStatus::Owned);
    algorithm.reconfigure(&mesh);
    assert_eq!(algorithm.selected_elements(), &[0, 1, 2, 3]);
}

#[test]
fn assembly_requires_a_linear_system() {
    let mesh = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(1), 2)
        .build()
        .unwrap();
    let mut algorithm = AssembleElemSolverAlgorithm::<Quad4>::new(
        &mesh,
        BLOCK_NAME,
        &SolutionOptions::default(),
        &[KernelSpec::ContinuityAdv],
        ScatterStrategy::Serial,
    )
    .unwrap();
    let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(0.1));
    assert!(algorithm.execute(&mut context).is_err());
}

#[test]
fn terms_must_declare_their_data_on_the_staged_requests() {
    let mesh = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(2), 2)
        .build()
        .unwrap();
    let meta = mesh.meta_data();
    let part = meta.get_part_ordinal(BLOCK_NAME).unwrap();
    let options = SolutionOptions::default();
    let build_kernel = |requests: &mut ElemDataRequests<Quad4>| -> ElemKernelVariant<Quad4> {
        ScalarDiffElemKernel::new(meta, &options, "pressure", "density", requests)
            .unwrap()
            .into()
    };

    let mut declared = ElemDataRequests::new();
    let kernel = build_kernel(&mut declared);
    let unrelated = ElemDataRequests::new();
    let foreign =
        AssembleElemSolverAlgorithm::from_kernels(&mesh, part, &unrelated, vec![kernel.clone()], ScatterStrategy::Serial);
    assert_eq!(foreign.unwrap_err(), ConfigError::ForeignDataRequests { index: 0 });

    // Same slot layout, but still different requests
    let mut lookalike = ElemDataRequests::new();
    let other_kernel = build_kernel(&mut lookalike);
    let mixed = AssembleElemSolverAlgorithm::from_kernels(
        &mesh,
        part,
        &declared,
        vec![kernel.clone(), other_kernel],
        ScatterStrategy::Serial,
    );
    assert_eq!(mixed.unwrap_err(), ConfigError::ForeignDataRequests { index: 1 });

    let mut algorithm =
        AssembleElemSolverAlgorithm::from_kernels(&mesh, part, &declared, vec![kernel], ScatterStrategy::Serial).unwrap();
    let mut system = CsrLinearSystem::from_mesh(&mesh);
    let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(0.1)).with_linear_system(&mut system);
    algorithm.execute(&mut context).unwrap();
}

#[test]
fn algorithm_construction_errors() {
    let mesh = with_continuity_fields(create_unit_square_uniform_quad_mesh_2d(1), 2)
        .build()
        .unwrap();
    let options = SolutionOptions::default();
    let specs = [KernelSpec::ContinuityAdv];

    let mismatch = AssembleElemSolverAlgorithm::<Tri3>::new(&mesh, BLOCK_NAME, &options, &specs, ScatterStrategy::Serial);
    assert!(matches!(
        mismatch,
        Err(ConfigError::TopologyMismatch {
            expected: TopologyKind::Tri3,
            found: TopologyKind::Quad4,
            ..
        })
    ));

    let unknown_part = create_assemble_elem_solver_algorithm(&mesh, "block_2", &options, &specs, ScatterStrategy::Serial);
    assert!(matches!(unknown_part, Err(ConfigError::UnknownPart { .. })));

    let unknown_field = create_assemble_elem_solver_algorithm(
        &mesh,
        BLOCK_NAME,
        &options,
        &[KernelSpec::ScalarDiff {
            scalar: "temperature".to_string(),
            diff_flux_coeff: "density".to_string(),
        }],
        ScatterStrategy::Serial,
    );
    assert!(matches!(unknown_field, Err(ConfigError::UnknownField { name }) if name == "temperature"));

    let wedge = MeshBuilder::with_coordinates(
        3,
        vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0,
        ],
    )
    .element_block(BLOCK_NAME, TopologyKind::Wedge6, (0..6).collect());
    let wedge = with_continuity_fields(wedge, 3).build().unwrap();
    let unsupported = create_assemble_elem_solver_algorithm(&wedge, BLOCK_NAME, &options, &specs, ScatterStrategy::Serial);
    assert!(matches!(
        unsupported,
        Err(ConfigError::UnsupportedTopology {
            topology: TopologyKind::Wedge6
        })
    ));
}

#[test]
fn runtime_dispatch_assembles_like_static_dispatch() {
    let mut mesh = with_continuity_fields(create_unit_box_uniform_tet_mesh_3d(2), 3)
        .build()
        .unwrap();
    set_continuity_state(&mut mesh);

    let mut algorithm = create_assemble_elem_solver_algorithm(
        &mesh,
        BLOCK_NAME,
        &SolutionOptions::default(),
        &[KernelSpec::ContinuityAdv],
        ScatterStrategy::Colored,
    )
    .unwrap();
    let mut system = CsrLinearSystem::from_mesh(&mesh);
    let mut context = PassContext::new(&mesh, TimeIntegrator::bdf2(0.01, 0.01)).with_linear_system(&mut system);
    algorithm.execute(&mut context).unwrap();

    let expected = assemble::<Tet4>(&mesh, &[KernelSpec::ContinuityAdv], ScatterStrategy::Serial);
    assert_matrix_eq!(system.rhs().clone(), expected.rhs().clone(), comp = abs, tol = 1e-12);
}

/// Two quads side by side. Viscosity lives on the left block only, and the nodes carry every
/// parallel status.
///
/// ```text
/// 3 --- 4 --- 5
/// |  L  |  R  |
/// 0 --- 1 --- 2
/// ```
fn two_block_mesh() -> MeshDb {
    MeshBuilder::with_coordinates(2, vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0])
        .element_block("left", TopologyKind::Quad4, vec![0, 1, 4, 3])
        .element_block("right", TopologyKind::Quad4, vec![1, 2, 5, 4])
        .field_on_parts("viscosity", 1, &["left"], 0.0)
        .field("turbulent_viscosity", 1, 0.0)
        .field("effective_viscosity", 1, -1.0)
        .field(SST_F_ONE_BLENDING, 1, 0.0)
        .node_status(1, EntityStatus::Shared)
        .node_status(2, EntityStatus::Ghosted)
        .node_status(3, EntityStatus::Ghosted)
        .node_status(4, EntityStatus::OwnedShared)
        .build()
        .unwrap()
}

#[test]
fn effective_viscosity_follows_blending_law_on_selected_nodes() {
    let mut mesh = two_block_mesh();
    set_field(&mut mesh, "viscosity", |node, _, mu| mu[0] = 1e-3 * (node + 1) as f64);
    set_field(&mut mesh, "turbulent_viscosity", |node, _, mut_| mut_[0] = 0.1 * (node + 1) as f64);
    let blending = [0.0, 1.0, 0.3, 0.25, 0.5, 0.7];
    set_field(&mut mesh, SST_F_ONE_BLENDING, |node, _, f1| f1[0] = blending[node]);

    let options = SolutionOptions::default();
    let mut algorithm = EffDiffFluxCoeffAlg::sst_k(
        &mesh,
        &options,
        "viscosity",
        "turbulent_viscosity",
        "effective_viscosity",
    )
    .unwrap();
    assert_eq!(algorithm.selected_nodes().ones().collect::<Vec<_>>(), vec![0, 1, 4]);

    let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(1.0));
    algorithm.execute(&mut context).unwrap();

    let evisc = mesh
        .meta_data()
        .get_field_ordinal("effective_viscosity")
        .unwrap();
    {
        let field = mesh.fields().field(evisc).read();
        assert!(field.is_fresh(MemorySpace::Device));
        assert!(field.need_sync_to(MemorySpace::Host));
        assert!(field.view(MemorySpace::Host).is_err());
        // The host copy still holds the initial values
        assert_eq!(field.unsynchronized_view(MemorySpace::Host), &[-1.0; 6]);
    }

    let (sigma_one, sigma_two) = (
        options.turbulence_model_constants.sigma_k_one,
        options.turbulence_model_constants.sigma_k_two,
    );
    let field = mesh.fields().read_synced(evisc, MemorySpace::Host);
    let values = field.view(MemorySpace::Host).unwrap();
    for node in 0..6 {
        let expected = if [0, 1, 4].contains(&node) {
            let f1 = blending[node];
            let n = (node + 1) as f64;
            1e-3 * n + 0.1 * n * (f1 * sigma_one + (1.0 - f1) * sigma_two)
        } else {
            -1.0
        };
        assert_scalar_eq!(values[node], expected, comp = abs, tol = 1e-14);
    }
    assert_scalar_eq!(values[0], 1e-3 + 0.1 * sigma_two, comp = abs, tol = 1e-14);
    assert_scalar_eq!(values[1], 2e-3 + 0.2 * sigma_one, comp = abs, tol = 1e-14);
}

#[test]
fn effective_viscosity_sees_host_writes() {
    let mut mesh = two_block_mesh();
    let options = SolutionOptions::default();
    let mut algorithm = EffDiffFluxCoeffAlg::sst_omega(
        &mesh,
        &options,
        "viscosity",
        "turbulent_viscosity",
        "effective_viscosity",
    )
    .unwrap();
    let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(1.0));
    algorithm.execute(&mut context).unwrap();

    // Inputs written on the host after the first pass are synchronized before the second one
    set_field(&mut mesh, "turbulent_viscosity", |_, _, mut_| mut_[0] = 2.0);
    set_field(&mut mesh, SST_F_ONE_BLENDING, |_, _, f1| f1[0] = 1.0);
    let mut context = PassContext::new(&mesh, TimeIntegrator::backward_euler(1.0));
    algorithm.execute(&mut context).unwrap();

    let evisc = mesh
        .meta_data()
        .get_field_ordinal("effective_viscosity")
        .unwrap();
    let field = mesh.fields().read_synced(evisc, MemorySpace::Host);
    let values = field.view(MemorySpace::Host).unwrap();
    let sigma_w_one = options.turbulence_model_constants.sigma_w_one;
    assert_scalar_eq!(values[4], 2.0 * sigma_w_one, comp = abs, tol = 1e-14);
    assert_scalar_eq!(values[5], -1.0, comp = abs, tol = 1e-14);
}

#[test]
fn effective_viscosity_construction_errors() {
    let mesh = two_block_mesh();
    let aliased = EffDiffFluxCoeffAlg::new(&mesh, "viscosity", "turbulent_viscosity", "viscosity", 1.0, 1.0);
    assert!(matches!(aliased, Err(ConfigError::AliasedField { .. })));

    let missing = EffDiffFluxCoeffAlg::new(&mesh, "viscosity", "eddy_viscosity", "effective_viscosity", 1.0, 1.0);
    assert!(matches!(missing, Err(ConfigError::UnknownField { name }) if name == "eddy_viscosity"));

    let without_blending = MeshBuilder::with_coordinates(2, vec![0.0; 2])
        .field("viscosity", 1, 0.0)
        .field("turbulent_viscosity", 1, 0.0)
        .field("effective_viscosity", 1, 0.0)
        .build()
        .unwrap();
    let missing = EffDiffFluxCoeffAlg::new(
        &without_blending,
        "viscosity",
        "turbulent_viscosity",
        "effective_viscosity",
        1.0,
        1.0,
    );
    assert!(matches!(missing, Err(ConfigError::UnknownField { name }) if name == SST_F_ONE_BLENDING));
}
