//! Validate FHIR documents against a directory of profiles.
//!
//! ```text
//! fhirvalidate --profiles ./profiles document.json bundle.xml
//! ```
//!
//! Findings at warning level and above go to stdout; the exit code is 1
//! when any document produced an error-level finding.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use erp_fhir::model::{xml_to_json, Element};
use erp_fhir::repository::{load, FhirStructureRepository, ViewSpec};
use erp_fhir::validator::{FhirPathValidator, Severity, ValidatorOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fhirvalidate", about = "Validate FHIR documents against profiles")]
struct Args {
    /// Directories with StructureDefinition/CodeSystem/ValueSet JSON
    /// files; all are loaded into one repository.
    #[arg(long = "profiles", required = true)]
    profiles: Vec<PathBuf>,

    /// Report extensions unknown at their position.
    #[arg(long)]
    report_unknown_extensions: bool,

    /// Documents to validate; `.xml` files are read as FHIR XML,
    /// everything else as JSON.
    #[arg(required = true)]
    documents: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("fhirvalidate: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let repo = load_repository(&args.profiles)?;
    let options = ValidatorOptions {
        report_unknown_extensions: args.report_unknown_extensions,
        validate_references: true,
        ..ValidatorOptions::default()
    };
    let mut all_passed = true;
    for document_path in &args.documents {
        let passed = validate_document(&repo, document_path, &options)
            .with_context(|| format!("validating {}", document_path.display()))?;
        all_passed &= passed;
    }
    Ok(all_passed)
}

fn load_repository(dirs: &[PathBuf]) -> Result<FhirStructureRepository> {
    let mut sources = Vec::new();
    for dir in dirs {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded profile source");
            sources.push(value);
        }
    }
    load(sources, Vec::<ViewSpec>::new()).context("building profile repository")
}

fn validate_document(
    repo: &FhirStructureRepository,
    path: &Path,
    options: &ValidatorOptions,
) -> Result<bool> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let document: serde_json::Value =
        if path.extension().and_then(|e| e.to_str()) == Some("xml") {
            xml_to_json(repo, &text).with_context(|| format!("converting {}", path.display()))?
        } else {
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        };
    let element = Element::resource_root(repo, &document)
        .map_err(|message| anyhow::anyhow!("{message}"))?;
    let root_path = element
        .resource_type()
        .unwrap_or("Resource")
        .to_string();
    let results = FhirPathValidator::validate(&element, &root_path, options.clone());
    for finding in results.results() {
        if finding.severity >= Severity::Warning {
            println!("{}: {finding}", path.display());
        }
    }
    let passed = results.highest_severity() < Severity::Error;
    println!(
        "{}: {}",
        path.display(),
        if passed { "OK" } else { "FAILED" }
    );
    Ok(passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_profiles_and_validates_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("record.json"),
            serde_json::to_vec(&serde_json::json!({
                "resourceType": "StructureDefinition",
                "url": "http://example.org/fhir/StructureDefinition/Record",
                "version": "1.0",
                "name": "Record",
                "type": "Record",
                "kind": "resource",
                "snapshot": {"element": [
                    {"path": "Record", "min": 0, "max": "*"},
                    {"path": "Record.active", "min": 1, "max": "1",
                     "type": [{"code": "boolean"}]}
                ]}
            }))
            .expect("serialize"),
        )
        .expect("write profile");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write other");
        let repo = load_repository(&[dir.path().to_path_buf()]).expect("repository loads");

        let good = dir.path().join("good.json");
        std::fs::write(&good, br#"{"resourceType": "Record", "active": true}"#)
            .expect("write document");
        let options = ValidatorOptions::default();
        assert!(validate_document(&repo, &good, &options).expect("validates"));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, br#"{"resourceType": "Record"}"#).expect("write document");
        assert!(!validate_document(&repo, &bad, &options).expect("validates"));
    }
}
