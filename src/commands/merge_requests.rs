use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::platform::list_merge_requests;

impl App {
    /// List open, non-draft merge requests across all repositories.
    pub async fn cmd_merge_requests(&self, json: bool, stdout: &mut impl std::io::Write) -> Result<()> {
        let merge_requests = list_merge_requests(self.platform.as_ref()).await?;

        if json {
            let entries: Vec<_> = merge_requests
                .iter()
                .map(|(repo, mr)| serde_json::json!({ "repository": repo.path, "merge_request": mr }))
                .collect();
            serde_json::to_writer_pretty(&mut *stdout, &entries)?;
            writeln!(stdout)?;
            return Ok(());
        }

        for (repo, mr) in &merge_requests {
            let number = format!("!{}", mr.number);
            let line = format!(
                "{} {} {} {} {}",
                repo.path.cyan(),
                number.yellow(),
                mr.title,
                format!("({} -> {})", mr.source_branch, mr.target_branch).dimmed(),
                mr.pipeline_state
            );
            writeln!(stdout, "{}", line)?;
        }

        Ok(())
    }
}
