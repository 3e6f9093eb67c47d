//! end-to-end pipeline: parse a YAML document, apply a variable context,
//! run a YAML-defined rule pipeline and compare the projected output.

use pretty_assertions::assert_eq;
use recast::ast::Ast;
use recast::render::render_inputs;
use recast::rules::RuleList;
use recast::vars::Vars;

fn yaml(text: &str) -> serde_json::Value {
    serde_yaml::from_str(text).unwrap()
}

#[test]
fn transpile_a_document_end_to_end() {
    let config = "\
agent:
  id: agent-1
inputs:
  - type: logfile
    paths:
      - /var/log/${service.name}.log
    condition: \"${service.enabled|'true'}\"
  - type: winlog
    condition: 'false'
outputs:
  default:
    type: logstash
    hosts:
      - localhost:5044
";
    let vars = Vars::new(yaml(
        "\
service:
  name: nginx
  enabled: true
",
    ))
    .unwrap();

    let rules: RuleList = serde_yaml::from_str(
        "\
- translate:
    path: outputs.default.type
    mapper:
      logstash: redirect
- copy_to_list:
    item: agent
    to: inputs
- filter:
    selectors:
    - inputs
    - outputs
",
    )
    .unwrap();

    let mut ast = Ast::from_value(yaml(config)).unwrap();
    ast.apply(&vars).unwrap();
    rules.apply(&mut ast).unwrap();

    assert_eq!(
        ast.to_value(),
        yaml(
            "\
inputs:
  - type: logfile
    paths:
      - /var/log/nginx.log
    agent:
      id: agent-1
outputs:
  default:
    type: redirect
    hosts:
      - localhost:5044
"
        )
    );
}

#[test]
fn render_one_template_across_contexts() {
    let template = yaml(
        "\
- type: logfile
  paths:
    - /var/log/${service.name}.log
",
    );
    let inputs = Ast::from_value(serde_json::json!({ "inputs": template }))
        .unwrap()
        .into_root();
    let inputs = inputs
        .as_dict()
        .and_then(|children| children.first())
        .cloned()
        .unwrap();

    let contexts = vec![
        Vars::new(yaml("service: {name: nginx}")).unwrap(),
        Vars::new(yaml("service: {name: postgres}")).unwrap(),
        Vars::new(yaml("service: {name: nginx}")).unwrap(),
        Vars::new(yaml("service: {other: ignored}")).unwrap(),
    ];

    let rendered = render_inputs(&inputs, &contexts).unwrap();
    assert_eq!(
        rendered.to_value(),
        yaml(
            "\
- type: logfile
  paths:
    - /var/log/nginx.log
- type: logfile
  paths:
    - /var/log/postgres.log
"
        )
    );
}
