use crate::types::WorkflowDefinition;

/// Render a workflow as a top-down flow diagram.
///
/// One declaration line per step in definition order, then one edge line per
/// dependency (`dep --> step`) following each step's dependency order.
pub fn render(definition: &WorkflowDefinition) -> String {
    let mut lines = vec!["graph TD".to_string()];

    for step in &definition.steps {
        lines.push(format!("    {}[{}]", step.id, label(&step.name)));
    }

    for step in &definition.steps {
        for dep in definition.dependencies_of(&step.id) {
            lines.push(format!("    {} --> {}", dep, step.id));
        }
    }

    lines.join("\n")
}

// Brackets would terminate the node label early
fn label(name: &str) -> String {
    name.replace('[', "(").replace(']', ")")
}
