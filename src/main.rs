use caddyctl::cli::{Cli, Command};
use caddyctl::process::Status;
use caddyctl::routes::Site;
use caddyctl::settings::Settings;
use caddyctl::{config, env_file, probe, process, routes};
use clap::{CommandFactory, Parser};
use comfy_table::{Attribute, Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let settings = Settings::load().map_err(|e| color_eyre::eyre::eyre!("{e}"))?;

    match command {
        Command::Status => cmd_status(&settings, cli.json).await,
        Command::Start => report(process::start(&settings).await),
        Command::Stop => report(process::stop(&settings).await),
        Command::Restart => report(process::restart(&settings).await),
        Command::List => cmd_list(&settings, cli.json).await,
        Command::Add {
            domain,
            port,
            project,
            no_reload,
        } => cmd_add(&settings, domain, port, project, no_reload).await,
        Command::Remove {
            domain,
            yes,
            no_reload,
        } => cmd_remove(&settings, domain, yes, no_reload).await,
    }

    Ok(())
}

/// Expected operational failures print a terse red line and a nonzero exit,
/// not a backtrace.
fn fail(message: &str) -> ! {
    eprintln!("{} {}", "error:".red().bold(), message);
    std::process::exit(1);
}

fn report(result: Result<String, process::ControlError>) {
    match result {
        Ok(message) => println!("{}", message.green()),
        Err(e) => fail(&e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Status & listing
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct StatusReport<'a> {
    status: &'a Status,
    sites: &'a [Site],
}

async fn gather_sites(settings: &Settings) -> Vec<Site> {
    let Some(doc) = config::load_config(settings).await else {
        return Vec::new();
    };
    let mut sites = routes::flatten(&doc);
    probe::probe_sites(&mut sites, settings.probe_timeout).await;
    sites
}

async fn cmd_status(settings: &Settings, json: bool) {
    let status = process::status(settings).await;
    let sites = gather_sites(settings).await;

    if json {
        let report = StatusReport {
            status: &status,
            sites: &sites,
        };
        let encoded = serde_json::to_string(&report).expect("failed to serialize status");
        println!("{encoded}");
        return;
    }

    if status.is_running {
        println!("{}: {}", settings.process_name.cyan().bold(), "running".green());
        if let Some(pid) = status.pid {
            println!("  {} {pid}", "pid:".dimmed());
        }
        if let Some(uptime) = &status.uptime {
            println!("  {} {uptime}", "uptime:".dimmed());
        }
    } else {
        println!("{}: {}", settings.process_name.cyan().bold(), "stopped".red());
    }

    print_sites(&sites);
}

async fn cmd_list(settings: &Settings, json: bool) {
    let sites = gather_sites(settings).await;

    if json {
        let encoded = serde_json::to_string(&sites).expect("failed to serialize sites");
        println!("{encoded}");
        return;
    }

    print_sites(&sites);
}

fn print_sites(sites: &[Site]) {
    if sites.is_empty() {
        println!("{}", "no sites configured".yellow());
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("host").add_attribute(Attribute::Bold),
        Cell::new("url").add_attribute(Attribute::Bold),
        Cell::new("upstream").add_attribute(Attribute::Bold),
        Cell::new("status").add_attribute(Attribute::Bold),
    ]);

    for site in sites {
        let upstream = site.proxy_target.as_deref().unwrap_or("-");
        let status_cell = match site.reachable {
            Some(true) => Cell::new("up").fg(Color::Green),
            Some(false) => Cell::new("down").fg(Color::Red),
            None => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(&site.host).fg(Color::Cyan),
            Cell::new(&site.url),
            Cell::new(upstream),
            status_cell,
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// Add & remove
// ---------------------------------------------------------------------------

fn resolve_domain(domain: Option<String>, project: Option<&Path>) -> String {
    if let Some(domain) = domain {
        return domain.trim().to_string();
    }

    let Some(dir) = project else {
        fail("a domain is required (or pass --project to derive one)");
    };

    match dir.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => {
            let derived = format!("{name}.localhost");
            println!("  {} {derived}", "domain:".dimmed());
            derived
        }
        _ => fail("could not derive a domain from the project directory name"),
    }
}

fn resolve_port(port: Option<u16>, project: Option<&Path>) -> u16 {
    if let Some(port) = port {
        return port;
    }

    let Some(dir) = project else {
        fail("a port is required (or pass --project with a .env PORT)");
    };

    match env_file::read_port(dir) {
        Ok(Some(port)) => {
            println!("  {} {port} (from .env)", "port:".dimmed());
            port
        }
        Ok(None) => fail("no --port given and no PORT found in the project's .env"),
        Err(e) => fail(&e.to_string()),
    }
}

async fn cmd_add(
    settings: &Settings,
    domain: Option<String>,
    port: Option<u16>,
    project: Option<PathBuf>,
    no_reload: bool,
) {
    let domain = resolve_domain(domain, project.as_deref());
    let port = resolve_port(port, project.as_deref());

    let mut doc = match config::read_file(&settings.config_file) {
        Ok(doc) => doc,
        Err(e) => fail(&e.to_string()),
    };

    // Conflicts are rejected before anything is written
    if let Err(e) = routes::check_new_site(&routes::flatten(&doc), &domain, port) {
        fail(&e.to_string());
    }

    if let Some(dir) = &project {
        if let Err(e) = env_file::write_port(dir, port) {
            fail(&e.to_string());
        }
        println!(
            "  {} {} (PORT={port})",
            "updated".dimmed(),
            dir.join(env_file::ENV_FILE_NAME).display()
        );
    }

    if let Err(e) = config::add_site(&mut doc, &domain, port) {
        fail(&e.to_string());
    }
    if let Err(e) = config::write_file(&doc, &settings.config_file) {
        fail(&e.to_string());
    }
    println!(
        "{}",
        format!("site added: {domain} -> 127.0.0.1:{port}").green()
    );

    reload(settings, no_reload).await;
}

async fn cmd_remove(settings: &Settings, domain: String, yes: bool, no_reload: bool) {
    if !yes {
        let confirmed = cliclack::confirm(format!("Delete site '{domain}'?"))
            .interact()
            .unwrap_or(false);
        if !confirmed {
            println!("{}", "aborted".yellow());
            return;
        }
    }

    let mut doc = match config::read_file(&settings.config_file) {
        Ok(doc) => doc,
        Err(e) => fail(&e.to_string()),
    };

    let removed = config::remove_site(&mut doc, &domain);
    if removed == 0 {
        println!("{}", format!("no site matching '{domain}'").yellow());
        return;
    }

    if let Err(e) = config::write_file(&doc, &settings.config_file) {
        fail(&e.to_string());
    }
    println!(
        "{}",
        format!("site removed: {domain} ({removed} route{})", plural(removed)).green()
    );

    reload(settings, no_reload).await;
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Second step of a mutation: restart the server so it re-reads the file. The
/// config write has already committed, and the message keeps the two outcomes
/// distinct.
async fn reload(settings: &Settings, no_reload: bool) {
    if no_reload {
        println!(
            "{}",
            format!("reload skipped; restart {} to apply", settings.process_name).yellow()
        );
        return;
    }

    match process::restart(settings).await {
        Ok(message) => println!("{}", message.green()),
        Err(e) => fail(&format!("config written, but reload failed: {e}")),
    }
}
