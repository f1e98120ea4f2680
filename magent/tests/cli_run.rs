use std::fs;
use std::path::Path;

use fmigrate::JobOutcome;
use magent::{run_job, RunArgs};

const ENTITIES: &str = r#"[
    { "name": "Account", "external_id": "Name" },
    {
        "name": "Contact",
        "external_id": "Email",
        "relationships": [{ "field": "AccountId", "parent": "Account" }]
    }
]"#;

fn write_job(base: &Path, config: &str) {
    fs::write(
        base.join("migration.json"),
        format!(r#"{{ "config": {config}, "entities": {ENTITIES} }}"#),
    )
    .unwrap();
}

fn args(base: &Path) -> RunArgs {
    RunArgs {
        base_path: base.to_path_buf(),
        yes: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn runs_a_file_job_from_its_job_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_job(dir.path(), "{}");
    fs::write(dir.path().join("Account.csv"), "Id,Name\na1,Acme\n")?;
    fs::write(
        dir.path().join("Contact.csv"),
        "Id,Email,AccountId\nc1,x@acme.io,a1\n",
    )?;

    let JobOutcome::Completed(summary) = run_job(&args(dir.path())).await? else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.execution_order, vec!["Account", "Contact"]);
    assert_eq!(summary.update.inserted, 2);
    assert!(dir.path().join("target/Account_insert.csv").exists());
    assert!(dir.path().join("target/Contact_insert.csv").exists());
    Ok(())
}

#[tokio::test]
async fn validate_only_flag_overrides_the_job_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_job(dir.path(), r#"{ "validate_only": false }"#);
    fs::write(dir.path().join("Account.csv"), "Id,Name\na1,Acme\na1,Acme\n")?;

    let mut args = args(dir.path());
    args.validate_only = true;
    let outcome = run_job(&args).await?;

    assert!(matches!(outcome, JobOutcome::ValidatedOnly { csv_issues: 1 }));
    assert!(!dir.path().join("target/Account_insert.csv").exists());
    Ok(())
}

#[tokio::test]
async fn org_endpoints_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_job(
        dir.path(),
        r#"{ "source": { "kind": "org", "alias": "prod" } }"#,
    );

    let err = run_job(&args(dir.path())).await.unwrap_err();
    assert!(err.to_string().contains("only file endpoints are supported"));
}

#[tokio::test]
async fn missing_job_file_names_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_job(&args(dir.path())).await.unwrap_err();
    assert!(err.to_string().starts_with("failed to load job file"));
}
