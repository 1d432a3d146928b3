//! Line-oriented terminal front-end: one page render per command.

use crate::dashboard::{ActionError, Dashboard, DashboardPage};
use crate::models::{AuditRecord, Notice, Platform};
use crate::sync::ViewState;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(
    name = "dashboard",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, Subcommand)]
enum ConsoleCommand {
    /// Sign in; the password is read from the next line
    Login { email: String },
    /// Sign out and forget all loaded configuration
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Snap auto-pause dashboard
    Snap {
        #[command(subcommand)]
        action: Option<PageCommand>,
    },
    /// Meta auto-pause dashboard
    Meta {
        #[command(subcommand)]
        action: Option<PageCommand>,
    },
    /// User activity log
    Logs {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Subcommand)]
enum PageCommand {
    /// Render the page
    Show,
    /// Re-fetch the configuration from the server
    Refresh,
    /// Enable or disable auto pause
    AutoPause {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Set the active campaign profit/loss value
    Threshold {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Manage individual campaign conditions
    Campaign {
        #[command(subcommand)]
        action: CampaignCommand,
    },
    /// Manage ad accounts
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
}

#[derive(Debug, Subcommand)]
enum CampaignCommand {
    Add {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    Update {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    Delete {
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum AccountCommand {
    Add { name: String, id: String },
    Delete { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

pub struct Console<R, W> {
    dashboard: Dashboard,
    notices: mpsc::UnboundedReceiver<Notice>,
    input: Lines<R>,
    out: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        dashboard: Dashboard,
        notices: mpsc::UnboundedReceiver<Notice>,
        input: R,
        out: W,
    ) -> Self {
        Self {
            dashboard,
            notices,
            input: input.lines(),
            out,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub async fn run(&mut self) -> io::Result<()> {
        writeln!(self.out, "Dashboard Login")?;
        writeln!(self.out, "Type `help` for the list of commands.")?;

        loop {
            self.drain_notices()?;
            write!(self.out, "> ")?;
            self.out.flush()?;

            let Some(line) = self.input.next_line().await? else {
                break;
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }

            let command = match ConsoleLine::try_parse_from(words) {
                Ok(parsed) => parsed.command,
                Err(e) => {
                    write!(self.out, "{e}")?;
                    continue;
                }
            };

            match command {
                ConsoleCommand::Quit => break,
                ConsoleCommand::Login { email } => self.login(&email).await?,
                ConsoleCommand::Logout => {
                    let result = self.dashboard.logout().await;
                    self.report(result)?;
                }
                ConsoleCommand::Whoami => self.whoami()?,
                ConsoleCommand::Snap { action } => {
                    self.page(Platform::Snap, action.unwrap_or(PageCommand::Show))
                        .await?
                }
                ConsoleCommand::Meta { action } => {
                    self.page(Platform::Meta, action.unwrap_or(PageCommand::Show))
                        .await?
                }
                ConsoleCommand::Logs { limit } => self.logs(limit).await?,
            }
        }

        self.dashboard.audit().flush().await;
        self.drain_notices()
    }

    async fn login(&mut self, email: &str) -> io::Result<()> {
        if let Some(session) = self.dashboard.session().get_session() {
            let who = session.user.email.as_deref().unwrap_or(&session.user.id);
            return self.notice(Notice::Info(format!("Already logged in as {who}")));
        }

        write!(self.out, "Password: ")?;
        self.out.flush()?;
        let password = match self.input.next_line().await? {
            Some(line) => SecretString::from(line.trim_end().to_string()),
            None => return Ok(()),
        };

        let result = self.dashboard.login(email, &password).await;
        self.report(result)
    }

    fn whoami(&mut self) -> io::Result<()> {
        match self.dashboard.session().get_session() {
            Some(session) => {
                let who = session.user.email.as_deref().unwrap_or(&session.user.id);
                self.notice(Notice::Success(format!("Welcome {who}")))
            }
            None => self.notice(Notice::Info("Not logged in".to_string())),
        }
    }

    async fn page(&mut self, platform: Platform, action: PageCommand) -> io::Result<()> {
        let page = self.dashboard.page(platform);
        let out = &mut self.out;

        if let Err(e) = page.ensure_loaded().await {
            writeln!(out, "{}", e.to_notice())?;
            if matches!(e, ActionError::NotSignedIn(_)) {
                return Ok(());
            }
        }

        if let Some(result) = run_page_command(page, action).await {
            writeln!(out, "{}", result.unwrap_or_else(|e| e.to_notice()))?;
        }

        match page.view().await {
            Ok(view) => write!(
                out,
                "{}",
                render_page(platform, &view, page.manages_ad_accounts())
            ),
            Err(e) => writeln!(out, "{}", e.to_notice()),
        }
    }

    async fn logs(&mut self, limit: Option<usize>) -> io::Result<()> {
        match self.dashboard.recent_activity().await {
            Ok(mut records) => {
                if let Some(limit) = limit {
                    records.truncate(limit);
                }
                let rendered = render_activity(&records);
                write!(self.out, "{rendered}")
            }
            Err(e) => self.notice(e.to_notice()),
        }
    }

    fn report(&mut self, result: Result<Notice, ActionError>) -> io::Result<()> {
        self.notice(result.unwrap_or_else(|e| e.to_notice()))
    }

    fn notice(&mut self, notice: Notice) -> io::Result<()> {
        writeln!(self.out, "{notice}")
    }

    fn drain_notices(&mut self) -> io::Result<()> {
        while let Ok(notice) = self.notices.try_recv() {
            writeln!(self.out, "{notice}")?;
        }
        Ok(())
    }
}

async fn run_page_command(
    page: &DashboardPage,
    action: PageCommand,
) -> Option<Result<Notice, ActionError>> {
    let result = match action {
        PageCommand::Show => return None,
        PageCommand::Refresh => page.refresh().await,
        PageCommand::AutoPause { state } => page.toggle_auto_pause(state == Switch::On).await,
        PageCommand::Threshold { value } => page.set_global_threshold(value).await,
        PageCommand::Campaign { action } => match action {
            CampaignCommand::Add { name, value } => page.add_campaign(&name, value).await,
            CampaignCommand::Update { name, value } => page.update_campaign(&name, value).await,
            CampaignCommand::Delete { name } => page.delete_campaign(&name).await,
        },
        PageCommand::Account { action } => match action {
            AccountCommand::Add { name, id } => page.add_ad_account(&name, &id).await,
            AccountCommand::Delete { name } => page.delete_ad_account(&name).await,
        },
    };
    Some(result)
}

pub fn render_page(platform: Platform, view: &ViewState, manages_ad_accounts: bool) -> String {
    let title = platform.title();
    let mut out = format!("== {title} Auto Pause Dashboard ==\n");

    if manages_ad_accounts {
        out.push_str(&format!("\nCurrent {title} Ad Accounts\n"));
        if view.ad_accounts.is_empty() {
            out.push_str("  No ad accounts found.\n");
        }
        for (name, id) in &view.ad_accounts {
            out.push_str(&format!("  {name} : {id}\n"));
        }
    }

    out.push_str(&format!(
        "\n{title} Auto Pause: {}\n",
        if view.active { "ON" } else { "OFF" }
    ));
    out.push_str(&format!(
        "Active Campaign Profit Value: {}\n",
        view.alert_profit_threshold
    ));

    out.push_str("\nIndividual Campaign Conditions\n");
    if view.campaigns.is_empty() {
        out.push_str("  No campaign conditions added yet.\n");
    }
    for (campaign, value) in &view.campaigns {
        out.push_str(&format!("  {campaign} : {value}\n"));
    }

    out
}

pub fn render_activity(records: &[AuditRecord]) -> String {
    if records.is_empty() {
        return "No logs found yet.\n".to_string();
    }

    let rows: Vec<[String; 4]> = records
        .iter()
        .map(|r| {
            [
                r.email.clone().unwrap_or_default(),
                r.action.clone(),
                r.details.to_string(),
                r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();

    let headers = ["email", "action", "details", "created_at"];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 4]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = line(headers);
    for row in &rows {
        out.push_str(&line([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]));
    }
    out
}
