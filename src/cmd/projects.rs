//! `atlantis projects` — dry-run of autoplan project selection.

use std::path::Path;

use anyhow::Result;
use atlantis::config::ParserValidator;
use atlantis::config::valid::GlobalConfig;
use atlantis::events::project_finder::ProjectFinder;

pub fn run(dir: &Path, modified: &[String]) -> Result<()> {
    let parser = ParserValidator;
    let finder = ProjectFinder;

    if parser.has_repo_config(dir) {
        let repo_config = parser.read_repo_config(dir, &GlobalConfig::default())?;
        let matched = finder.find_by_config(modified, &repo_config)?;
        println!("{} projects matched via atlantis.yaml", matched.len());
        for project in matched {
            let enabled = if project.autoplan.enabled {
                ""
            } else {
                " (autoplan disabled)"
            };
            println!(
                "  dir={} workspace={}{}",
                project.dir, project.workspace, enabled
            );
        }
    } else {
        let matched = finder.find_by_tree(modified, dir);
        println!("{} projects determined from the repo tree", matched.len());
        for project in matched {
            println!("  dir={} workspace=default", project.path);
        }
    }
    Ok(())
}
