use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::platform::RepositoryListOpts;

impl App {
    /// List every repository the configured identity can act on.
    pub async fn cmd_repos(
        &self,
        opts: RepositoryListOpts,
        json: bool,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repositories = self.platform.repositories(opts).await?;

        if json {
            serde_json::to_writer_pretty(&mut *stdout, &repositories)?;
            writeln!(stdout)?;
            return Ok(());
        }

        for repo in &repositories {
            let mut line = format!("{} {}", repo.path.cyan(), repo.default_branch.dimmed());
            if !repo.commit_hash.is_empty() {
                line.push_str(&format!(" {}", &repo.commit_hash[..repo.commit_hash.len().min(12)]));
            }
            if repo.is_empty {
                line.push_str(&format!(" {}", "(empty)".yellow()));
            }
            if repo.is_fork {
                line.push_str(&format!(" {}", "(fork)".dimmed()));
            }
            writeln!(stdout, "{}", line.trim_end())?;

            if !repo.branches.is_empty() {
                writeln!(stdout, "  {}", repo.branches.join(", ").dimmed())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::App;
    use crate::platform::MockPlatform;
    use crate::platform::Repository;
    use crate::platform::RepositoryListOpts;

    fn platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform.expect_repositories().returning(|_| {
            Ok(vec![
                Repository {
                    path: "acme/widgets".to_string(),
                    default_branch: "main".to_string(),
                    commit_hash: "0123456789abcdef0123456789abcdef01234567".to_string(),
                    branches: vec!["main".to_string(), "bot/deps".to_string()],
                    ..Default::default()
                },
                Repository {
                    path: "acme/blank".to_string(),
                    is_empty: true,
                    ..Default::default()
                },
            ])
        });
        platform
    }

    #[tokio::test]
    async fn test_repos_text() {
        let app = App::new(Box::new(platform()));
        let mut out = Vec::new();
        app.cmd_repos(RepositoryListOpts::default(), false, &mut out)
            .await
            .unwrap();

        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        acme/widgets main 0123456789ab
          main, bot/deps
        acme/blank  (empty)
        ");
    }

    #[tokio::test]
    async fn test_repos_json_omits_handle() {
        let app = App::new(Box::new(platform()));
        let mut out = Vec::new();
        app.cmd_repos(RepositoryListOpts::default(), true, &mut out)
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["path"], "acme/widgets");
        assert_eq!(value[1]["is_empty"], true);
        assert!(value[0].get("handle").is_none());
    }
}
