//! Human-readable linkage and constraint reports.

use crate::phase::{OptionsMap, Phase, PhaseConstraint};
use crate::resolve::ResolvedLinkage;
use crate::traits::PhaseQuery;

const INDENT: &str = "    ";

/// Format like a `{:.4e}` with a signed, two-digit exponent: `1.2300e+02`.
pub(crate) fn fmt_sci(value: f64) -> String {
    let formatted = format!("{value:.4e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

/// Report of every resolved linkage, grouped by phase pair in resolution order.
///
/// Fixed sides (or sides that are inputs) are marked with `*`.
pub fn linkage_report(pathname: &str, linkages: &[ResolvedLinkage]) -> String {
    let mut lines = vec![format!("--- Linkage Report [{pathname}] ---")];

    let mut start = 0;
    while start < linkages.len() {
        let pair = |l: &ResolvedLinkage| (l.side_a().phase.clone(), l.side_b().phase.clone());
        let key = pair(&linkages[start]);
        let end = linkages[start..]
            .iter()
            .position(|l| pair(l) != key)
            .map_or(linkages.len(), |n| start + n);
        let group = &linkages[start..end];

        lines.push(format!("{INDENT}--- {} - {} ---", key.0, key.1));
        let pad_a = group.iter().map(|l| l.side_a().prefixed.len()).max().unwrap_or(0) + 2;
        let pad_b = group.iter().map(|l| l.side_b().prefixed.len()).max().unwrap_or(0) + 2;
        for linkage in group {
            let (a, b) = (linkage.side_a(), linkage.side_b());
            let arrow = if linkage.connected() { "->" } else { "==" };
            lines.push(format!(
                "{INDENT}{INDENT}{:<pad_a$} [{}{}] {arrow}  {:<pad_b$} [{}{}]",
                a.prefixed,
                a.loc,
                if a.fixed { "*" } else { "" },
                b.prefixed,
                b.loc,
                if b.fixed { "*" } else { "" },
            ));
        }
        start = end;
    }

    lines.push(String::new());
    lines.push("* : Value is fixed or is an input.".to_string());
    lines.join("\n") + "\n"
}

fn constraint_line(phase: &Phase, loc: &str, constraint: &PhaseConstraint) -> String {
    let units = match &constraint.units {
        Some(units) => units.clone(),
        None => phase
            .classify_var(&constraint.name)
            .resolve(phase, &constraint.name)
            .ok()
            .and_then(|r| r.units)
            .unwrap_or_else(|| "None".to_string()),
    };
    let loc = format!("[{loc}]");
    let name = &constraint.name;
    match constraint.equals {
        Some(equals) => format!(
            "{INDENT}{INDENT}{loc:<10}{} == {name} [{units}]",
            fmt_sci(equals)
        ),
        None => {
            let lower = constraint
                .lower
                .map(|v| format!("{} <=", fmt_sci(v)))
                .unwrap_or_default();
            let upper = constraint
                .upper
                .map(|v| format!("<= {} ", fmt_sci(v)))
                .unwrap_or_default();
            format!("{INDENT}{INDENT}{loc:<10}{lower} {name} {upper} [{units}]")
        }
    }
}

/// Report of the boundary and path constraints of every phase.
///
/// Phases not owned by this process only contribute their header.
pub fn constraint_report(pathname: &str, phases: &OptionsMap<Phase>) -> String {
    let mut lines = vec![String::new(), format!("--- Constraint Report [{pathname}] ---")];
    for (name, phase) in phases.iter() {
        lines.push(format!("{INDENT}--- {name} ---"));
        if !phase.is_local {
            continue;
        }
        if !phase.has_constraints() {
            lines.push(format!("{INDENT}{INDENT}None"));
        }
        for (loc, constraints) in [
            ("initial", &phase.initial_constraints),
            ("final", &phase.final_constraints),
            ("path", &phase.path_constraints),
        ] {
            lines.extend(constraints.iter().map(|c| constraint_line(phase, loc, c)));
        }
    }
    lines.join("\n") + "\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkage::{LinkageOptions, LinkageSpec, Loc};
    use crate::phase::StateOptions;
    use crate::resolve::resolve_linkage;

    #[test]
    fn scientific_format_matches_fixed_width_exponent() {
        assert_eq!(fmt_sci(100.0), "1.0000e+02");
        assert_eq!(fmt_sci(-0.00125), "-1.2500e-03");
        assert_eq!(fmt_sci(0.0), "0.0000e+00");
        assert_eq!(fmt_sci(1.0e21), "1.0000e+21");
        assert_eq!(fmt_sci(2.5e-123), "2.5000e-123");
    }

    fn phase() -> Phase {
        let mut phase = Phase::default();
        phase
            .add_state(
                "x",
                StateOptions {
                    units: Some("m".into()),
                    fix_initial: true,
                    ..Default::default()
                },
            )
            .add_state("velocity", StateOptions { units: Some("m".into()), ..Default::default() });
        phase
    }

    #[test]
    fn linkage_report_pads_names_and_marks_fixed_sides() {
        let (p1, p2) = (phase(), phase());
        let linkages: Vec<_> = [("x", false), ("velocity", true)]
            .iter()
            .map(|&(var, connected)| {
                let options = LinkageOptions {
                    connected,
                    ..Default::default()
                };
                let spec = LinkageSpec::declare("traj", "p1", "p2", var, var, options).unwrap();
                resolve_linkage("traj", &spec, &p1, &p2).unwrap()
            })
            .collect();

        let report = linkage_report("traj", &linkages);
        let expected = "--- Linkage Report [traj] ---\n\
                        \x20   --- p1 - p2 ---\n\
                        \x20       states:x          [final] ==  states:x          [initial*]\n\
                        \x20       states:velocity   [final] ->  states:velocity   [initial]\n\
                        \n* : Value is fixed or is an input.\n";
        assert_eq!(report, expected);
    }

    #[test]
    fn constraint_report_lists_bounds() {
        let mut phase = phase();
        phase
            .add_boundary_constraint(
                Loc::Final,
                PhaseConstraint {
                    name: "x".into(),
                    equals: Some(100.0),
                    ..Default::default()
                },
            )
            .add_path_constraint(PhaseConstraint {
                name: "velocity".into(),
                lower: Some(0.0),
                upper: Some(5.0),
                units: Some("km".into()),
                ..Default::default()
            });
        let mut empty = Phase::default();
        empty.add_state("x", StateOptions::default());
        let mut remote = Phase::default();
        remote.is_local = false;

        let phases: OptionsMap<Phase> = [("climb", phase), ("cruise", empty), ("descent", remote)]
            .into_iter()
            .map(|(n, p)| (n.to_string(), p))
            .collect();
        let report = constraint_report("traj", &phases);
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(
            lines,
            [
                "",
                "--- Constraint Report [traj] ---",
                "    --- climb ---",
                "        [final]   1.0000e+02 == x [m]",
                "        [path]    0.0000e+00 <= velocity <= 5.0000e+00  [km]",
                "    --- cruise ---",
                "        None",
                "    --- descent ---",
                "",
            ]
        );
    }
}
