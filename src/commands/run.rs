use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::task::ScriptTask;
use crate::task::Task;

impl App {
    pub async fn cmd_run(&self, task: ScriptTask, stdout: &mut impl std::io::Write) -> Result<()> {
        let tasks: Vec<Box<dyn Task>> = vec![Box::new(task)];
        let report = self.execute_tasks(&tasks).await?;

        for outcome in &report.outcomes {
            writeln!(stdout, "{}", outcome)?;
        }

        let summary = format!(
            "{} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        if report.failed() > 0 {
            writeln!(stdout, "{}", summary.red())?;
        } else {
            writeln!(stdout, "{}", summary.green())?;
        }

        Ok(())
    }
}
