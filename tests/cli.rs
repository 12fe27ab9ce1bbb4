use std::process::Command;

fn site_router(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_site_router"));
    cmd.current_dir(dir)
        .env_remove("ACCOUNT_ID")
        .env_remove("AWS_REGION")
        .env_remove("DOMAIN_NAME")
        .env_remove("AWS_DEFAULT_REGION");
    cmd
}

#[test]
fn missing_environment_exits_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    for args in [&[][..], &["synth"][..], &["deploy"][..], &["destroy"][..]] {
        let out = site_router(dir.path()).args(args).output().unwrap();
        assert_eq!(out.status.code(), Some(1), "{args:?}");
        let stderr = String::from_utf8_lossy(&out.stderr);
        for name in ["ACCOUNT_ID", "AWS_REGION", "DOMAIN_NAME"] {
            assert!(stderr.contains(name), "{stderr}");
        }
    }
    assert!(!dir.path().join("router.out").exists());
    assert!(!dir.path().join("router.context.json").exists());
}

#[test]
fn one_missing_variable_is_enough_to_abort() {
    let dir = tempfile::tempdir().unwrap();
    let out = site_router(dir.path())
        .env("ACCOUNT_ID", "123456789012")
        .env("AWS_REGION", "us-east-1")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("DOMAIN_NAME"));
    assert!(!dir.path().join("router.out").exists());
}

#[test]
fn unknown_region_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = site_router(dir.path())
        .env("ACCOUNT_ID", "123456789012")
        .env("AWS_REGION", "mars-north-1")
        .env("DOMAIN_NAME", "example.com")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(!dir.path().join("router.out").exists());
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = site_router(dir.path()).arg("launch").output().unwrap();
    assert!(!out.status.success());
}
