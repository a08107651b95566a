use std::collections::HashMap;

use nalgebra::DMatrix;
use trajlink_core::linkage_comp::LinkageComp;
use trajlink_core::phase::{ControlOptions, OdeOutputMeta, ParameterOptions, StateOptions};
use trajlink_core::timeseries::DT_DSTAU;
use trajlink_core::{
    Connection, GridData, LinkageOptions, Loc, Phase, PhaseKind, SrcIndices, Trajectory,
    TrajectoryError, Transcription, VarClass,
};

fn ascent_phase() -> Phase {
    let mut phase = Phase::new(PhaseKind::Pseudospectral);
    phase
        .add_state("x", StateOptions { units: Some("m".into()), ..Default::default() })
        .add_state("v", StateOptions { units: Some("m/s".into()), ..Default::default() })
        .add_control("theta", ControlOptions { units: Some("rad".into()), ..Default::default() })
        .add_parameter("m", ParameterOptions { units: Some("kg".into()), ..Default::default() })
        .add_ode_output("thrust", OdeOutputMeta { units: Some("N".into()), shape: vec![1] });
    phase
}

fn two_phase_trajectory() -> Trajectory {
    let mut traj = Trajectory::new("traj");
    traj.add_phase("p1", ascent_phase())
        .add_phase("p2", ascent_phase());
    traj
}

#[test_log::test]
fn wildcard_links_time_and_every_state() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint(
        "p1",
        "p2",
        "*",
        "*",
        LinkageOptions {
            loc_a: Loc::Initial,
            mult_a: Some(2.0),
            ..Default::default()
        },
    )
    .unwrap();

    let config = traj.configure().unwrap();
    let vars: Vec<_> = config
        .linkages
        .iter()
        .map(|l| l.side_b().var.as_str())
        .collect();
    assert_eq!(vars, ["time", "x", "v"]);
    for linkage in &config.linkages {
        assert_eq!(linkage.spec().loc_a, Loc::Initial);
        assert_eq!(linkage.spec().loc_b, Loc::Initial);
        assert_eq!(linkage.spec().mult_a, 2.0);
        assert_eq!(linkage.spec().mult_b, -1.0);
    }
    assert_eq!(config.linkages[0].side_a().class, VarClass::Time);

    let comp = config.linkage_comp.unwrap();
    let names: Vec<_> = comp.constraints().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["p1:time_to_p2:time", "p1:x_to_p2:x", "p1:v_to_p2:v"]);
}

#[test]
fn default_linkage_enforces_equality_to_zero() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint("p1", "p2", "x", "x", LinkageOptions::default())
        .unwrap();
    let spec = traj.linkages().get("p1", "p2", "x", "x").unwrap();
    assert_eq!(spec.equals, Some(0.0));
    assert_eq!(spec.mult_a, 1.0);
    assert_eq!(spec.mult_b, -1.0);
    assert_eq!((spec.loc_a, spec.loc_b), (Loc::Final, Loc::Initial));
}

#[test]
fn fixed_states_cannot_be_linked_by_constraint() {
    let mut traj = two_phase_trajectory();
    traj.phase_mut("p1").unwrap().states.get_mut("x").unwrap().fix_final = true;
    traj.phase_mut("p2").unwrap().states.get_mut("x").unwrap().fix_initial = true;
    traj.add_linkage_constraint("p1", "p2", "x", "x", LinkageOptions::default())
        .unwrap();

    let err = traj.configure().unwrap_err();
    match &err {
        TrajectoryError::InfeasibleLinkage {
            phase_a,
            var_a,
            loc_a,
            phase_b,
            var_b,
            loc_b,
            ..
        } => {
            assert_eq!((phase_a.as_str(), var_a.as_str(), *loc_a), ("p1", "x", Loc::Final));
            assert_eq!((phase_b.as_str(), var_b.as_str(), *loc_b), ("p2", "x", Loc::Initial));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("Invalid linkage in trajectory traj"));
}

#[test]
fn connected_time_and_state_read_the_last_node() {
    let mut traj = two_phase_trajectory();
    let connected = LinkageOptions {
        connected: true,
        ..Default::default()
    };
    traj.add_linkage_constraint("p1", "p2", "time", "time", connected.clone())
        .unwrap();
    traj.add_linkage_constraint("p1", "p2", "x", "x", connected)
        .unwrap();

    let config = traj.configure().unwrap();
    assert_eq!(
        config.connections,
        [
            Connection::new("p1.timeseries.time", "p2.t_initial", Some(SrcIndices::Last)),
            Connection::new(
                "p1.timeseries.states:x",
                "p2.initial_states:x",
                Some(SrcIndices::Last)
            ),
        ]
    );
    let report = config.linkage_report.unwrap();
    assert!(report.contains("time       [final] ->  time       [initial*]"));
    assert!(report.contains("states:x   [final] ->  states:x   [initial*]"));
}

#[test]
fn shared_linkage_inputs_are_connected_once() {
    let mut traj = Trajectory::new("traj");
    traj.add_phase("p1", ascent_phase())
        .add_phase("p2", ascent_phase())
        .add_phase("p3", ascent_phase());
    traj.link_phases(&["p1", "p2", "p3"], &["v"], &[], LinkageOptions::default())
        .unwrap();
    traj.add_linkage_constraint(
        "p1",
        "p3",
        "v",
        "v",
        LinkageOptions {
            loc_a: Loc::Initial,
            loc_b: Loc::Final,
            ..Default::default()
        },
    )
    .unwrap();

    let config = traj.configure().unwrap();
    let linkage_targets: Vec<_> = config
        .connections
        .iter()
        .filter(|c| c.tgt.starts_with("linkages."))
        .map(|c| c.tgt.as_str())
        .collect();
    assert_eq!(
        linkage_targets,
        ["linkages.p1:states:v", "linkages.p2:states:v", "linkages.p3:states:v"]
    );
    let comp: LinkageComp = config.linkage_comp.unwrap();
    assert_eq!(comp.constraints().len(), 3);
    assert_eq!(comp.inputs().count(), 3);
}

#[test]
fn control_rates_and_ode_outputs_link_by_constraint() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint("p1", "p2", "theta_rate", "theta_rate", LinkageOptions::default())
        .unwrap();
    traj.add_linkage_constraint("p1", "p2", "thrust", "thrust", LinkageOptions::default())
        .unwrap();

    let config = traj.configure().unwrap();
    let rate = &config.linkages[0];
    assert_eq!(rate.side_a().class, VarClass::ControlRate);
    assert_eq!(rate.side_a().source, "timeseries.control_rates:theta_rate");
    assert_eq!(rate.units(), Some("rad/s"));
    let thrust = &config.linkages[1];
    assert_eq!(thrust.side_a().source, "rhs_all.thrust");

    let comp = config.linkage_comp.unwrap();
    let inputs = HashMap::from([
        (
            "p1:control_rates:theta_rate".to_string(),
            DMatrix::from_row_slice(2, 1, &[0.0, 0.5]),
        ),
        (
            "p2:control_rates:theta_rate".to_string(),
            DMatrix::from_row_slice(2, 1, &[0.25, 0.0]),
        ),
        ("p1:thrust".to_string(), DMatrix::from_row_slice(2, 1, &[0.0, 10.0])),
        ("p2:thrust".to_string(), DMatrix::from_row_slice(2, 1, &[10.0, 0.0])),
    ]);
    let values = comp.compute(&inputs).unwrap();
    assert_eq!(values["p1:theta_rate_to_p2:theta_rate"][0], 0.25);
    assert_eq!(values["p1:thrust_to_p2:thrust"][0], 0.0);
}

#[test]
fn connected_linkage_adopts_source_units_without_a_mismatch_check() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint(
        "p1",
        "p2",
        "x",
        "v",
        LinkageOptions {
            connected: true,
            ..Default::default()
        },
    )
    .unwrap();

    let config = traj.configure().unwrap();
    let linkage = &config.linkages[0];
    assert_eq!(linkage.side_a().units.as_deref(), Some("m"));
    assert_eq!(linkage.side_b().units.as_deref(), Some("m/s"));
    assert_eq!(linkage.units(), Some("m"));
    assert_eq!(
        config.connections,
        [Connection::new(
            "p1.timeseries.states:x",
            "p2.initial_states:v",
            Some(SrcIndices::Last)
        )]
    );
}

#[test]
fn constraint_units_mismatch_is_rejected_during_configure() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint("p1", "p2", "x", "v", LinkageOptions::default())
        .unwrap();
    let message = traj.configure().unwrap_err().to_string();
    assert!(message.contains("units of var_a 'x' (m) in p1 and var_b 'v' (m/s) in p2"));
}

#[test]
fn units_override_reaches_linkage_inputs_and_constraints() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint(
        "p1",
        "p2",
        "x",
        "v",
        LinkageOptions {
            units: Some("ft".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let config = traj.configure().unwrap();
    assert_eq!(config.linkages[0].units(), Some("ft"));
    let comp = config.linkage_comp.unwrap();
    let constraint = &comp.constraints()[0];
    assert_eq!(constraint.name, "p1:x_to_p2:v");
    assert_eq!(constraint.units.as_deref(), Some("ft"));
    let inputs: Vec<_> = comp
        .inputs()
        .map(|i| (i.name.as_str(), i.units.as_deref()))
        .collect();
    assert_eq!(
        inputs,
        [("p1:states:x", Some("ft")), ("p2:states:v", Some("ft"))]
    );
}

#[test]
fn connecting_into_a_control_is_rejected() {
    let mut traj = two_phase_trajectory();
    traj.add_linkage_constraint(
        "p1",
        "p2",
        "theta",
        "theta",
        LinkageOptions {
            connected: true,
            ..Default::default()
        },
    )
    .unwrap();
    let err = traj.configure().unwrap_err();
    assert!(err
        .to_string()
        .contains("the target variable must be `time`, a state, or a parameter"));
}

#[test]
fn phase_timeseries_resamples_onto_uniform_output() {
    let phase = ascent_phase();
    let input = GridData::new(Transcription::RadauPs, 4, 3, None).unwrap();
    let output = GridData::new(Transcription::Uniform, 1, 21, None).unwrap();
    let ts = phase.timeseries_outputs(&input, Some(&output), "all").unwrap();

    let n = input.num_nodes;
    let duration = 8.0;
    let time = |ptau: f64| 1.0 + 0.5 * (ptau + 1.0) * duration;
    let mut inputs = HashMap::new();
    let x = DMatrix::from_fn(n, 1, |i, _| time(input.node_ptau[i]).powi(2));
    inputs.insert("input_values:states:x".to_string(), x);
    inputs.insert(
        DT_DSTAU.to_string(),
        DMatrix::from_fn(n, 1, |i, _| 0.5 * duration * input.node_dptau_dstau[i]),
    );
    for name in ["time", "time_phase", "states:v", "controls:theta", "control_rates:theta_rate2"] {
        inputs.insert(format!("input_values:{name}"), DMatrix::zeros(n, 1));
    }

    let out = ts.compute(&inputs).unwrap();
    let x_out = &out["states:x"];
    assert_eq!(x_out.nrows(), 21);
    for k in 0..21 {
        let t = time(output.node_ptau[k]);
        assert!((x_out[(k, 0)] - t * t).abs() < 1e-9);
    }
    assert!(out["control_rates:theta_rate"].iter().all(|v| v.abs() < 1e-12));
}
