use assert_cmd::Command;
use assert_cmd::cargo;
use mockito::{Server, ServerGuard};
use pkgman::http::HttpClient;
use pkgman::job::Job;
use pkgman::manager::PackageManager;
use pkgman::plan::{PlanError, Selection};
use pkgman::runtime::RealRuntime;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use zip::ZipWriter;
use zip::write::FileOptions;

fn create_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<()> = FileOptions::default();
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Serve a catalog with `org.example.App 1.0` depending on
/// `org.example.Lib [1, 2)` and two versions of the library.
async fn catalog_server() -> ServerGuard {
    let mut server = Server::new_async().await;
    let url = server.url();

    let app = create_zip(&[("bin/app", "#!/bin/sh\necho app\n")]);
    let lib = create_zip(&[("lib/liblib.so", "ELF")]);
    let catalog = format!(
        r#"{{
            "spec_version": "2.0",
            "packages": [
                {{"name": "org.example.App", "title": "Example application"}},
                {{"name": "org.example.Lib", "title": "Example library"}}
            ],
            "versions": [
                {{"package": "org.example.App", "name": "1.0", "url": "{url}/app-1.0.zip",
                  "hash": "{app_hash}",
                  "dependencies": [{{"package": "org.example.Lib", "versions": "[1, 2)"}}],
                  "files": [{{"path": "app.ini", "content": "portable=1"}}]}},
                {{"package": "org.example.Lib", "name": "1.4", "url": "{url}/lib-1.4.zip"}},
                {{"package": "org.example.Lib", "name": "1.5", "url": "{url}/lib-1.5.zip"}}
            ]
        }}"#,
        url = url,
        app_hash = hex::encode(Sha256::digest(&app)),
    );

    server
        .mock("GET", "/catalog.json")
        .with_header("content-type", "application/json")
        .with_body(catalog)
        .create_async()
        .await;
    server
        .mock("GET", "/app-1.0.zip")
        .with_body(app)
        .create_async()
        .await;
    for version in ["1.4", "1.5"] {
        server
            .mock("GET", format!("/lib-{}.zip", version).as_str())
            .with_body(lib.clone())
            .create_async()
            .await;
    }
    server
}

fn manager(server: &ServerGuard, root: &Path) -> PackageManager<RealRuntime> {
    PackageManager::new(
        Arc::new(RealRuntime),
        root.to_path_buf(),
        vec![format!("{}/catalog.json", server.url())],
        HttpClient::new(reqwest::Client::new()),
    )
}

fn installed_names(manager: &PackageManager<RealRuntime>) -> Vec<String> {
    manager
        .get_installed()
        .unwrap()
        .into_iter()
        .filter_map(|id| manager.package_version(id))
        .filter(|pv| pv.package.starts_with("org.example."))
        .map(|pv| pv.to_string())
        .collect()
}

#[tokio::test]
async fn test_install_and_uninstall_with_dependency() {
    let server = catalog_server().await;
    let root = tempdir().unwrap();
    let manager = manager(&server, root.path());

    let job = Job::new();
    manager.load(&job).await.unwrap();
    assert!(job.is_completed());

    let ops = manager
        .plan_install(&[Selection::Package("org.example.App".to_string())])
        .unwrap();
    assert_eq!(ops.len(), 2);

    let job = Job::new();
    manager.process(ops, &job).await.unwrap();
    assert!((job.progress() - 1.0).abs() < 1e-9);

    let app_dir = root.path().join("org.example.App-1");
    assert_eq!(
        std::fs::read_to_string(app_dir.join("bin/app")).unwrap(),
        "#!/bin/sh\necho app\n"
    );
    assert_eq!(std::fs::read_to_string(app_dir.join("app.ini")).unwrap(), "portable=1");
    assert!(root.path().join("org.example.Lib-1.5/lib/liblib.so").exists());
    assert_eq!(installed_names(&manager), vec!["org.example.App 1", "org.example.Lib 1.5"]);

    let err = manager
        .plan_uninstall(&[Selection::Package("org.example.Lib".to_string())])
        .unwrap_err();
    assert_eq!(
        err,
        PlanError::RequiredBy {
            target: "org.example.Lib 1.5".to_string(),
            dependent: "org.example.App 1".to_string(),
        }
    );

    let ops = manager
        .plan_uninstall(&[
            Selection::Package("org.example.App".to_string()),
            Selection::Package("org.example.Lib".to_string()),
        ])
        .unwrap();
    manager.process(ops, &Job::new()).await.unwrap();
    assert!(installed_names(&manager).is_empty());
    assert!(!app_dir.exists());
}

#[tokio::test]
async fn test_update_replaces_old_version() {
    let server = catalog_server().await;
    let root = tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("org.example.Lib-1.4/lib")).unwrap();
    let manager = manager(&server, root.path());
    manager.load(&Job::new()).await.unwrap();
    assert_eq!(installed_names(&manager), vec!["org.example.Lib 1.4"]);

    let ops = manager
        .plan_update(&[Selection::Package("org.example.Lib".to_string())])
        .unwrap();
    manager.process(ops, &Job::new()).await.unwrap();

    assert_eq!(installed_names(&manager), vec!["org.example.Lib 1.5"]);
    assert!(!root.path().join("org.example.Lib-1.4").exists());

    let err = manager
        .plan_update(&[Selection::Package("org.example.Lib".to_string())])
        .unwrap_err();
    assert!(matches!(err, PlanError::NewestInstalled { .. }));
}

#[tokio::test]
async fn test_unreachable_source_names_the_source() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/catalog.json")
        .with_status(404)
        .create_async()
        .await;
    let root = tempdir().unwrap();
    let manager = manager(&server, root.path());

    let job = Job::new();
    assert!(manager.load(&job).await.is_err());
    let message = job.error_message().unwrap();
    assert!(message.starts_with(&format!(
        "Error loading the catalog source {}/catalog.json",
        server.url()
    )));
}

#[test]
fn test_cli_install_and_list() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(catalog_server());
    let root = tempdir().unwrap();
    let config = tempdir().unwrap();
    let source = format!("{}/catalog.json", server.url());

    let mut cmd = Command::new(cargo::cargo_bin!("pkgman"));
    cmd.env("XDG_CONFIG_HOME", config.path())
        .arg("install")
        .arg("org.example.App")
        .arg("--root")
        .arg(root.path())
        .arg("--source")
        .arg(&source);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("install org.example.Lib 1.5"))
        .stdout(predicates::str::contains("install org.example.App 1"));

    assert!(root.path().join("org.example.App-1").is_dir());
    assert!(root.path().join("org.example.Lib-1.5").is_dir());

    let mut list_cmd = Command::new(cargo::cargo_bin!("pkgman"));
    list_cmd
        .env("XDG_CONFIG_HOME", config.path())
        .arg("list")
        .arg("--installed")
        .arg("--root")
        .arg(root.path())
        .arg("--source")
        .arg(&source);
    list_cmd
        .assert()
        .success()
        .stdout(predicates::str::contains("org.example.App 1 [installed]"))
        .stdout(predicates::str::contains("org.example.Lib 1.5 [installed]"));
}

#[test]
fn test_cli_sources_are_persisted() {
    let config = tempdir().unwrap();

    Command::new(cargo::cargo_bin!("pkgman"))
        .env("XDG_CONFIG_HOME", config.path())
        .args(["sources", "add", "https://a.example.org/catalog.json"])
        .assert()
        .success();

    assert!(config.path().join("pkgman/settings.json").exists());

    Command::new(cargo::cargo_bin!("pkgman"))
        .env("XDG_CONFIG_HOME", config.path())
        .args(["sources", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("1. https://a.example.org/catalog.json"));

    Command::new(cargo::cargo_bin!("pkgman"))
        .env("XDG_CONFIG_HOME", config.path())
        .args(["sources", "remove", "https://b.example.org/catalog.json"])
        .assert()
        .failure();
}

#[test]
fn test_cli_unknown_package_fails() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(catalog_server());
    let root = tempdir().unwrap();
    let config = tempdir().unwrap();

    Command::new(cargo::cargo_bin!("pkgman"))
        .env("XDG_CONFIG_HOME", config.path())
        .arg("install")
        .arg("org.example.Missing")
        .arg("--root")
        .arg(root.path())
        .arg("--source")
        .arg(format!("{}/catalog.json", server.url()))
        .assert()
        .failure()
        .stderr(predicates::str::contains("Unknown object selected"));
}
