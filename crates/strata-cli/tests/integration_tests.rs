//! Integration tests for CLI commands

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run strata with an isolated remote cache
fn strata(args: &[&str]) -> Output {
    let cache = std::env::temp_dir().join("strata-cli-tests-cache");
    Command::new(env!("CARGO_BIN_EXE_strata"))
        .args(args)
        .env("STRATA_CACHE_DIR", cache)
        .env_remove("STRATA_LOG")
        .output()
        .expect("Failed to execute strata")
}

/// Get the fixtures path
fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")
}

fn fixture(path: &str) -> String {
    format!("{}/{}", fixtures_path(), path)
}

fn write(root: &Path, path: &str, content: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1
  template:
    spec:
      containers:
      - name: web
        image: nginx:1.0
"#;

mod build_command {
    use super::*;

    #[test]
    fn test_build_overlay() {
        let output = strata(&["build", &fixture("web-app/overlays/prod")]);

        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("name: prod-web-app"));
        assert!(stdout.contains("replicas: 10"));
        assert!(stdout.contains("namespace: prod"));
        assert!(stdout.contains("image: web-app:2.0"));
        assert!(stdout.contains("value: prod-web"));
        assert!(stdout.contains("name: prod-app-config-"));
        assert!(stdout.contains("LOG_LEVEL: info"));
        assert!(stdout.contains("DEBUG: 'true'"));
    }

    #[test]
    fn test_overlay_hash_differs_from_base() {
        let config_name = |stdout: &str| {
            stdout
                .lines()
                .find(|line| line.trim_start().starts_with("name: ") && line.contains("app-config-"))
                .map(|line| line.rsplit('-').next().unwrap_or_default().to_string())
                .unwrap()
        };

        let base = strata(&["build", &fixture("web-app/base")]);
        let overlay = strata(&["build", &fixture("web-app/overlays/prod")]);
        assert!(base.status.success());
        assert!(overlay.status.success());

        let base_hash = config_name(&String::from_utf8_lossy(&base.stdout));
        let overlay_hash = config_name(&String::from_utf8_lossy(&overlay.stdout));
        assert_eq!(base_hash.len(), 10);
        assert_ne!(base_hash, overlay_hash);
    }

    #[test]
    fn test_build_is_deterministic() {
        let first = strata(&["build", &fixture("web-app/overlays/prod")]);
        let second = strata(&["build", &fixture("web-app/overlays/prod")]);
        assert!(first.status.success());
        assert_eq!(first.stdout, second.stdout);
    }

    #[test]
    fn test_build_to_file() {
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out.yaml");

        let output = strata(&[
            "build",
            &fixture("web-app/base"),
            "-o",
            out.to_str().unwrap(),
        ]);

        assert!(output.status.success());
        assert!(output.stdout.is_empty());
        let written = fs::read_to_string(&out).unwrap();
        assert!(written.contains("name: web-app"));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Wrote 3 resources"));
    }

    #[test]
    fn test_cycle_exit_code() {
        let output = strata(&["build", &fixture("cycle/a")]);

        assert_eq!(output.status.code(), Some(3));
        assert!(output.stdout.is_empty());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("strata::build::reference_cycle"));
    }

    #[test]
    fn test_json_error_format() {
        let dir = TempDir::new().unwrap();

        let output = strata(&[
            "build",
            dir.path().to_str().unwrap(),
            "--error-format",
            "json",
        ]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        let json: serde_json::Value =
            serde_json::from_str(&stderr).expect("stderr should be valid JSON");
        assert_eq!(json["error"]["kind"], "load");
        assert_eq!(json["error"]["code"], "strata::build::load");
        assert_eq!(json["error"]["exitCode"], 2);
    }

    #[test]
    fn test_duplicate_resource_conflicts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "kustomization.yaml", "resources:\n- a.yaml\n- b.yaml\n");
        write(dir.path(), "a.yaml", DEPLOYMENT);
        write(dir.path(), "b.yaml", DEPLOYMENT);

        let output = strata(&["build", dir.path().to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(5));
        assert!(String::from_utf8_lossy(&output.stderr).contains("merge_conflict"));
    }

    #[test]
    fn test_patch_without_target_match() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "kustomization.yaml",
            r#"resources:
- deployment.yaml
patches:
- target:
    kind: StatefulSet
  patch: |-
    - op: remove
      path: /spec/replicas
"#,
        );
        write(dir.path(), "deployment.yaml", DEPLOYMENT);

        let output = strata(&["build", dir.path().to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(7));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_load_restrictor() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "shared/deployment.yaml", DEPLOYMENT);
        write(
            dir.path(),
            "unit/kustomization.yaml",
            "resources:\n- ../shared/deployment.yaml\n",
        );
        let unit = dir.path().join("unit");

        let restricted = strata(&["build", unit.to_str().unwrap()]);
        assert_eq!(restricted.status.code(), Some(2));

        let open = strata(&["build", unit.to_str().unwrap(), "--load-restrictor", "none"]);
        assert!(open.status.success());
    }

    #[test]
    fn test_invalid_flags() {
        let output = strata(&["build", &fixture("web-app/base"), "--remote-timeout", "0"]);
        assert_eq!(output.status.code(), Some(64));

        let output = strata(&["build", &fixture("web-app/base"), "--max-parallel", "0"]);
        assert_eq!(output.status.code(), Some(64));
    }
}

mod edit_command {
    use super::*;

    fn unit() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "kustomization.yaml",
            "namePrefix: dev-\nresources:\n- deployment.yaml\n",
        );
        write(dir.path(), "deployment.yaml", DEPLOYMENT);
        dir
    }

    #[test]
    fn test_set_image_then_build() {
        let dir = unit();
        let path = dir.path().to_str().unwrap();

        let output = strata(&["edit", "set", "image", "nginx=registry.local/nginx:1.25", "--dir", path]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

        let unit_file = fs::read_to_string(dir.path().join("kustomization.yaml")).unwrap();
        assert!(unit_file.starts_with("namePrefix: dev-"));
        assert!(unit_file.contains("newName: registry.local/nginx"));

        let built = strata(&["build", path]);
        assert!(String::from_utf8_lossy(&built.stdout).contains("image: registry.local/nginx:1.25"));
    }

    #[test]
    fn test_set_replicas_then_build() {
        let dir = unit();
        let path = dir.path().to_str().unwrap();

        let output = strata(&["edit", "set", "replicas", "web=4", "--dir", path]);
        assert!(output.status.success());

        let built = strata(&["build", path]);
        assert!(String::from_utf8_lossy(&built.stdout).contains("replicas: 4"));
    }

    #[test]
    fn test_bad_argument_leaves_file_untouched() {
        let dir = unit();
        let before = fs::read_to_string(dir.path().join("kustomization.yaml")).unwrap();

        let output = strata(&[
            "edit",
            "set",
            "replicas",
            "web=2",
            "db=many",
            "--dir",
            dir.path().to_str().unwrap(),
        ]);

        assert_eq!(output.status.code(), Some(2));
        let after = fs::read_to_string(dir.path().join("kustomization.yaml")).unwrap();
        assert_eq!(before, after);
    }
}
