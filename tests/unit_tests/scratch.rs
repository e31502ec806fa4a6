use crate::unit_tests::{node_coordinates, set_field, stage_element, stage_element_with_counters};
use cvfem::error::ConfigError;
use cvfem::master_element::{MasterElementCall, ScsMasterElement};
use cvfem::mesh::procedural::create_rectangular_uniform_hex_mesh;
use cvfem::scratch::{CoordsType, ElemDataRequests, OperatorVariant, StagingCounters, StagingCounts};
use cvfem::topology::{Hex8, Topology};
use matrixcompare::assert_scalar_eq;

#[test]
fn staged_data_matches_mesh_and_master_element() {
    let mut mesh = create_rectangular_uniform_hex_mesh([2.0, 1.0, 1.0], [2, 1, 1])
        .map_coordinates(|_, x| x[2] += 0.1 * x[0] * x[1])
        .field("temperature", 1, 0.0)
        .field("velocity", 3, 0.0)
        .build()
        .unwrap();
    set_field(&mut mesh, "temperature", |node, _, t| t[0] = node as f64);
    set_field(&mut mesh, "velocity", |_, x, u| u.copy_from_slice(x));
    let meta = mesh.meta_data();
    let coordinates = meta.get_field_ordinal("coordinates").unwrap();
    let temperature = meta.get_field_ordinal("temperature").unwrap();
    let velocity = meta.get_field_ordinal("velocity").unwrap();

    let mut requests = ElemDataRequests::<Hex8>::new();
    let coords = requests.add_coordinates_field(coordinates, CoordsType::Current);
    let t = requests.gather_scalar(temperature);
    let u = requests.gather_vector(velocity);
    let areav = requests.scs_areav(CoordsType::Current);
    let shifted_grad = requests.scs_grad_op(CoordsType::Current, OperatorVariant::Shifted);
    let shape = requests.scs_shape_fcn(OperatorVariant::Standard);
    let scratch = stage_element(&mesh, &requests, 1);

    let nodes = mesh.blocks()[0].element_nodes(1);
    let x = node_coordinates(&mesh);
    for (n, &node) in nodes.iter().enumerate() {
        assert_eq!(scratch.scalar(t)[n], node as f64);
        for d in 0..3 {
            assert_eq!(scratch.vector(coords)[(n, d)], x[node][d]);
            assert_eq!(scratch.vector(u)[(n, d)], x[node][d]);
        }
    }

    let master_element = ScsMasterElement::<Hex8>::new();
    let local_coords = scratch.vector(coords).as_slice().to_vec();
    let mut expected_areav = vec![0.0; Hex8::NUM_SCS_IP * 3];
    let mut expected_grad = vec![0.0; Hex8::NUM_SCS_IP * 8 * 3];
    let mut det_j = vec![0.0; Hex8::NUM_SCS_IP];
    master_element.determinant(&local_coords, &mut expected_areav);
    master_element.shifted_grad_op(&local_coords, &mut expected_grad, &mut det_j);
    assert_eq!(scratch.scs_areav(areav).as_slice(), expected_areav.as_slice());
    assert_eq!(scratch.scs_grad_op(shifted_grad).as_slice(), expected_grad.as_slice());

    for ip in 0..Hex8::NUM_SCS_IP {
        let sum: f64 = (0..8).map(|n| scratch.scs_shape_fcn(shape)[(ip, n)]).sum();
        assert_scalar_eq!(sum, 1.0, comp = abs, tol = 1e-14);
    }
}

#[test]
fn gradient_variants_keep_separate_determinants() {
    let mesh = create_rectangular_uniform_hex_mesh([2.0, 1.0, 1.0], [2, 1, 1])
        .map_coordinates(|_, x| x[0] += 0.2 * x[0] * x[1])
        .field("temperature", 1, 0.0)
        .build()
        .unwrap();
    let meta = mesh.meta_data();
    let coordinates = meta.get_field_ordinal("coordinates").unwrap();
    let temperature = meta.get_field_ordinal("temperature").unwrap();

    let mut requests = ElemDataRequests::<Hex8>::new();
    let coords = requests.add_coordinates_field(coordinates, CoordsType::Current);
    requests.gather_scalar(temperature);
    requests.gather_scalar(temperature);
    let grad = requests.scs_grad_op(CoordsType::Current, OperatorVariant::Standard);
    let shifted_grad = requests.scs_grad_op(CoordsType::Current, OperatorVariant::Shifted);
    requests.scs_grad_op(CoordsType::Current, OperatorVariant::Shifted);
    let counters = StagingCounters::default();
    let scratch = stage_element_with_counters(&mesh, &requests, 1, &counters);

    let master_element = ScsMasterElement::<Hex8>::new();
    let local_coords = scratch.vector(coords).as_slice().to_vec();
    let mut grad_op = vec![0.0; Hex8::NUM_SCS_IP * 8 * 3];
    let mut det_j = vec![0.0; Hex8::NUM_SCS_IP];
    let mut shifted_det_j = vec![0.0; Hex8::NUM_SCS_IP];
    master_element.grad_op(&local_coords, &mut grad_op, &mut det_j);
    master_element.shifted_grad_op(&local_coords, &mut grad_op, &mut shifted_det_j);

    assert_ne!(det_j, shifted_det_j);
    assert_eq!(scratch.scs_det_j(grad).as_slice(), det_j.as_slice());
    assert_eq!(scratch.scs_det_j(shifted_grad).as_slice(), shifted_det_j.as_slice());

    // Coordinates and temperature are gathered once each, and each gradient variant is evaluated once
    assert_eq!(
        counters.counts(),
        StagingCounts {
            elements_staged: 1,
            nodal_field_gathers: 2,
            master_element_evaluations: 2,
        }
    );
}

#[test]
fn model_coordinates_are_tracked_separately() {
    let mesh = create_rectangular_uniform_hex_mesh([1.0, 1.0, 1.0], [1, 1, 1])
        .field("current_coordinates", 3, 0.0)
        .build()
        .unwrap();
    let meta = mesh.meta_data();
    let model = meta.get_field_ordinal("coordinates").unwrap();
    let current = meta.get_field_ordinal("current_coordinates").unwrap();

    let mut requests = ElemDataRequests::<Hex8>::new();
    requests.add_coordinates_field(model, CoordsType::Model);
    requests.add_coordinates_field(current, CoordsType::Current);
    requests.scs_areav(CoordsType::Model);
    requests.scs_grad_op(CoordsType::Current, OperatorVariant::Standard);
    requests.scs_grad_op(CoordsType::Model, OperatorVariant::Standard);

    assert_eq!(
        requests
            .master_element_calls(CoordsType::Model)
            .collect::<Vec<_>>(),
        vec![MasterElementCall::ScsAreav, MasterElementCall::ScsGradOp]
    );
    assert_eq!(requests.fields().count(), 2);
    assert!(requests.finalize(meta).is_ok());

    // Two different fields cannot both be the current coordinates
    requests.add_coordinates_field(model, CoordsType::Current);
    assert!(matches!(requests.finalize(meta), Err(ConfigError::InvalidOption { .. })));
}
