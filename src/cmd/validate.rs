//! `atlantis validate` — parse and report both config tiers.

use std::path::Path;

use anyhow::{Result, bail};
use atlantis::config::valid::GlobalConfig;
use atlantis::config::{ATLANTIS_YAML_FILENAME, ParserValidator};

pub fn run(dir: &Path, server_config: Option<&Path>, repo_id: Option<&str>) -> Result<()> {
    let parser = ParserValidator;

    let global = match server_config {
        Some(path) => {
            let global = parser.read_server_config(path)?;
            println!(
                "server config ok: {} repo policies, {} workflows",
                global.repos.len(),
                global.workflows.len()
            );
            global
        }
        None => GlobalConfig::default(),
    };

    if !parser.has_repo_config(dir) {
        bail!("no {} found in {}", ATLANTIS_YAML_FILENAME, dir.display());
    }
    let repo_config = parser.read_repo_config(dir, &global)?;
    println!(
        "{} ok: {} projects, {} workflows, automerge {}",
        ATLANTIS_YAML_FILENAME,
        repo_config.projects.len(),
        repo_config.workflows.len(),
        repo_config.automerge
    );

    for project in &repo_config.projects {
        let name = project.name.as_deref().unwrap_or("-");
        println!(
            "  project dir={} workspace={} name={}",
            project.dir, project.workspace, name
        );
    }

    if let Some(repo_id) = repo_id {
        let policy = global.effective_policy(repo_id);
        println!(
            "effective policy for {}: allowed_overrides=[{}] allow_custom_workflows={}",
            repo_id,
            policy.allowed_overrides.join(", "),
            policy.allow_custom_workflows
        );
        for project in &repo_config.projects {
            global.merge_project_config(repo_id, project, &repo_config)?;
        }
        println!("all projects merge cleanly under the server policy");
    }

    Ok(())
}
