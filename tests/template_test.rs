use std::path::PathBuf;

use pretty_assertions::assert_eq;
use sqltemplate::prelude::*;
use sqltemplate::{parse_files, parse_fs, parse_glob};

fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
        .join(name)
}

fn parsed(src: &str) -> Template {
    let mut t = Template::new("q");
    must(t.parse(src));
    t
}

#[test]
fn test_dot_is_escaped() {
    assert_eq!(parsed("{{.}}").render("A").unwrap(), "'A'");
}

#[test]
fn test_declared_variable_is_escaped_once() {
    assert_eq!(parsed("{{$v := .}}{{$v}}").render("A").unwrap(), "'A'");
}

#[test]
fn test_printf_through_variable() {
    let t = parsed("{{$v := printf \"~%s~\" .}}{{printf \"<%s>\" $v}}");
    assert_eq!(t.render("A").unwrap(), "'<~A~>'");
}

#[test]
fn test_injection_attempt_stays_a_literal() {
    let t = parsed("SELECT * FROM users WHERE name = {{.}}");
    assert_eq!(
        t.render("x'; DROP TABLE users; --").unwrap(),
        "SELECT * FROM users WHERE name = 'x''; DROP TABLE users; --'"
    );
}

#[test]
fn test_trusted_values() {
    let t = parsed("SELECT {{.cols}} FROM {{.table}} ORDER BY {{.order}}");
    let mut data = std::collections::BTreeMap::new();
    data.insert("cols".to_string(), Value::Raw(RawSql::from("id, email")));
    data.insert("table".to_string(), Value::Identifier("user accounts".into()));
    data.insert("order".to_string(), Value::Raw(RawSql::from("id DESC")));
    assert_eq!(
        t.render(data).unwrap(),
        "SELECT id, email FROM \"user accounts\" ORDER BY id DESC"
    );
}

#[test]
fn test_nested_control_flow_all_escaped() {
    let t = parsed(concat!(
        "{{range .rows}}",
        "{{if .ok}}{{.v}}{{else}}{{with .alt}}{{.}}{{else}}{{.v}}{{end}}{{end}};",
        "{{end}}"
    ));
    let data = serde_json::json!({
        "rows": [
            {"ok": true, "v": "a"},
            {"ok": false, "v": "b", "alt": "c"},
            {"ok": false, "v": 1},
        ]
    });
    assert_eq!(t.render(data).unwrap(), "'a';'c';1;");
}

#[test]
fn test_reparse_is_stable() {
    let src = "WHERE a = {{.a}} {{if .b}}AND b = {{.b}}{{end}}";
    let t = parsed(src);
    let once = t.tree().unwrap().to_string();

    let mut again = Template::new("q");
    must(again.parse(&once));
    assert_eq!(again.tree().unwrap().to_string(), once);
}

#[test]
fn test_independent_parses_render_alike() {
    let src = concat!(
        "SELECT {{.cols}} FROM t WHERE a = {{.a}}",
        "{{range $i, $v := .ids}}{{if $i}},{{else}} AND id IN ({{end}}{{$v}}{{end}})",
        "{{with .note}} AND note = {{printf \"%s!\" .}}{{end}}"
    );
    let first = parsed(src);
    let second = parsed(src);
    let data = || {
        serde_json::json!({"cols": "x", "a": "it's", "ids": [1, 2.5, null], "note": "hi"})
    };
    let out = first.render(data()).unwrap();
    assert_eq!(out, second.render(data()).unwrap());
    assert_eq!(
        out,
        "SELECT 'x' FROM t WHERE a = 'it''s' AND id IN (1,2.5,NULL) AND note = 'hi!'"
    );
}

#[derive(Debug)]
struct NullString(Option<&'static str>);

impl Valuer for NullString {
    fn value(&self) -> Result<Value, BoxError> {
        Ok(self.0.into())
    }
}

#[test]
fn test_literals_through_template() {
    use chrono::{TimeZone, Utc};

    let t = parsed("{{.}}");
    let cases: Vec<(Value, &str)> = vec![
        (Value::Null, "NULL"),
        (true.into(), "TRUE"),
        (42.into(), "42"),
        (3.25.into(), "3.25"),
        (f64::INFINITY.into(), "'Infinity'"),
        (f64::NEG_INFINITY.into(), "'-Infinity'"),
        (f64::NAN.into(), "'NaN'"),
        (b"test".to_vec().into(), "'\\x74657374'"),
        ("te'st".into(), "'te''st'"),
        (Identifier::from("my table").into(), "\"my table\""),
        (RawSql::from("now()").into(), "now()"),
        (
            Utc.with_ymd_and_hms(2020, 2, 2, 12, 30, 45).unwrap().into(),
            "'2020-02-02T12:30:45Z'",
        ),
        (Value::valuer(NullString(Some("v"))), "'v'"),
        (Value::valuer(NullString(None)), "NULL"),
    ];
    for (value, want) in cases {
        assert_eq!(t.render(value).unwrap(), want);
    }
}

#[test]
fn test_clone_is_independent() {
    let mut original = parsed("{{define \"x\"}}1{{end}}{{template \"x\"}}");
    let mut copy = original.clone();

    must(copy.parse("{{define \"x\"}}2{{end}}{{template \"x\"}}"));
    must(original.parse("{{define \"y\"}}3{{end}}{{template \"x\"}}"));

    assert_eq!(original.render(Value::Null).unwrap(), "1");
    assert_eq!(copy.render(Value::Null).unwrap(), "2");
    assert!(copy.lookup("y").is_none());
    assert!(original.lookup("y").is_some());
}

#[test]
fn test_execute_template_and_lookup() {
    let t = parsed("{{define \"by_id\"}}WHERE id = {{.}}{{end}}main");
    assert_eq!(t.render_template("by_id", 42).unwrap(), "WHERE id = 42");

    let by_id = t.lookup("by_id").unwrap();
    assert_eq!(by_id.name(), "by_id");
    assert_eq!(by_id.render(7).unwrap(), "WHERE id = 7");

    let mut out = Vec::new();
    t.execute(&mut out, Value::Null).unwrap();
    assert_eq!(out, b"main");
    assert_eq!(t.defined_templates(), "; defined templates are: \"by_id\", \"q\"");
}

#[test]
fn test_new_template_shares_definitions() {
    let t = parsed("{{define \"cond\"}}x = {{.}}{{end}}");
    let mut child = t.new_template("child");
    assert!(child.tree().is_none());
    must(child.parse("WHERE {{template \"cond\" .}}"));
    assert_eq!(child.render(true).unwrap(), "WHERE x = TRUE");
}

#[test]
fn test_custom_delims() {
    let mut t = Template::new("q").delims("[[", "]]");
    must(t.parse("SELECT '{{literal}}', [[.]]"));
    assert_eq!(t.render(1.5).unwrap(), "SELECT '{{literal}}', 1.5");
}

#[test]
fn test_missingkey_error() {
    let mut t = Template::new("q").option("missingkey=error").unwrap();
    must(t.parse("{{.absent}}"));
    let err = t.render(serde_json::json!({})).unwrap_err();
    assert_eq!(
        err.to_string(),
        "template: q:1: executing \"q\" at <.absent>: map has no entry for key \"absent\""
    );
}

#[test]
fn test_unsupported_value_fails() {
    let err = parsed("IN {{.}}")
        .render(Value::List(vec![1.into(), 2.into()]))
        .unwrap_err();
    assert!(matches!(err, Error::Encode { .. }));
    assert!(err.to_string().ends_with("unsupported type list"));
}

#[test]
fn test_templates_count() {
    let t = parsed("{{define \"a\"}}a{{end}}{{define \"b\"}}b{{end}}");
    let mut names: Vec<String> = t.templates().iter().map(|t| t.name().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b", "q"]);
}

#[test]
fn test_parse_files() {
    let t = parse_files(&[testdata("users.tmpl"), testdata("filter.tmpl")]).unwrap();
    assert_eq!(t.name(), "users.tmpl");

    let data = serde_json::json!({"name": "ann", "tags": ["x", "y"], "limit": 10});
    assert_eq!(
        t.render(data).unwrap(),
        "SELECT id, email FROM users WHERE name = 'ann' AND tag IN ('x', 'y') LIMIT 10\n"
    );
}

#[test]
fn test_parse_files_requires_files() {
    let err = parse_files::<PathBuf>(&[]).unwrap_err();
    assert_eq!(err.to_string(), "sqltemplate: no files named in call to ParseFiles");
}

#[test]
fn test_parse_glob() {
    let pattern = testdata("*.tmpl");
    let t = parse_glob(pattern.to_str().unwrap()).unwrap();
    assert!(t.lookup("filter").is_some());
    assert!(t.lookup("orders.tmpl").is_some());
    assert!(t.lookup("users.tmpl").is_some());

    let sql = t
        .render_template(
            "orders.tmpl",
            serde_json::json!({"table": "orders", "min_total": 99.5}),
        )
        .unwrap();
    assert_eq!(sql, "SELECT * FROM 'orders' WHERE total > 99.5\n");
}

#[test]
fn test_parse_glob_no_match() {
    let pattern = testdata("*.missing");
    let pattern = pattern.to_str().unwrap();
    let err = parse_glob(pattern).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("sqltemplate: pattern matches no files: `{}`", pattern)
    );
}

fn sql_files() -> MemFs {
    MemFs::new()
        .with("sql/by_id.tmpl", "SELECT * FROM users WHERE {{template \"cond\" .}}")
        .with("sql/cond.part", "{{define \"cond\"}}id = {{.}}{{end}}")
        .with("other/skip.tmpl", "skipped")
}

#[test]
fn test_parse_fs_dir() {
    let fsys = DirFs::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests"));
    let t = parse_fs(&fsys, &["testdata/*.tmpl"]).unwrap();
    assert_eq!(t.name(), "filter.tmpl");
    assert!(t.lookup("filter").is_some());
    assert!(t.lookup("orders.tmpl").is_some());

    let data = serde_json::json!({"name": "ann", "tags": [], "limit": 5});
    assert_eq!(
        t.render_template("users.tmpl", data).unwrap(),
        "SELECT id, email FROM users WHERE name = 'ann' LIMIT 5\n"
    );
}

#[test]
fn test_parse_fs_several_patterns() {
    let t = parse_fs(&sql_files(), &["sql/*.tmpl", "sql/*.part"]).unwrap();
    assert_eq!(t.name(), "by_id.tmpl");
    assert!(t.lookup("cond.part").is_some());
    assert!(t.lookup("skip.tmpl").is_none());
    assert_eq!(t.render(3).unwrap(), "SELECT * FROM users WHERE id = 3");

    let mut named = Template::new("test");
    must(named.parse_fs(&sql_files(), &["sql/*"]));
    assert_eq!(named.name(), "test");
    assert_eq!(named.render_template("by_id.tmpl", "x").unwrap(), "SELECT * FROM users WHERE id = 'x'");
}

#[test]
fn test_parse_fs_errors() {
    let fsys = sql_files();

    let err = parse_fs(&fsys, &[]).unwrap_err();
    assert_eq!(err.to_string(), "sqltemplate: no patterns provided in call to ParseFS");
    let err = Template::new("test").parse_fs(&fsys, &[]).unwrap_err();
    assert_eq!(err.to_string(), "sqltemplate: no files named in call to ParseFiles");

    let err = parse_fs(&fsys, &[""]).unwrap_err();
    assert_eq!(err.to_string(), "sqltemplate: pattern matches no files: ``");
    let err = Template::new("test").parse_fs(&fsys, &["sql/*.tmpl", "none/*"]).unwrap_err();
    assert_eq!(err.to_string(), "sqltemplate: pattern matches no files: `none/*`");

    assert!(matches!(parse_fs(&fsys, &["["]), Err(Error::Pattern(_))));
}

#[test]
fn test_concurrent_execution() {
    let t = std::sync::Arc::new(parsed("id = {{.}}"));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let t = std::sync::Arc::clone(&t);
            std::thread::spawn(move || t.render(i).unwrap())
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("id = {}", i));
    }
}
