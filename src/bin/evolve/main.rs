#![doc = include_str!("../../../README.md")]

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use clap::Parser;
use tracing::Level;

mod args;
use args::{Command, CommandLineArgs, CreateCommand, UpdateCommand};
use evolve_config::Config;
use evolve_repo::{format_timestamp, Descriptor, NodeType, Repository};

fn init_logger(verbosity: u8) {
    let sub = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_file(false)
        .with_line_number(false);
    let (level, pretty) = match verbosity {
        0 => (Level::WARN, false),
        1 => (Level::INFO, false),
        2 => (Level::INFO, true),
        3 => (Level::DEBUG, true),
        _ => (Level::TRACE, true),
    };
    let sub = sub.with_max_level(level);
    if pretty {
        sub.pretty().init();
    } else {
        sub.init();
    }
}

fn main() -> Result<()> {
    let args = CommandLineArgs::parse();
    init_logger(args.verbose);

    let config = Config::resolve(args.repo, &args.config_file)?;

    match args.command {
        Command::Init => {
            Repository::init(config.repository())?;
            println!("initialized repository at [{}]", config.repository());
            Ok(())
        }
        command => run(&Repository::open(config.repository())?, command),
    }
}

fn run(repo: &Repository, command: Command) -> Result<()> {
    match command {
        Command::Init => unreachable!("handled before opening the repository"),
        Command::Create(CreateCommand::Project { path }) => repo.create_project(&path)?,
        Command::Create(CreateCommand::Release { path }) => repo.create_release(&path)?,
        Command::Create(CreateCommand::Rlink { release, name }) => {
            repo.create_rlink(&release, &name)?
        }
        Command::Update(UpdateCommand::Rlink { release, name }) => {
            repo.update_rlink(&release, &name)?
        }
        Command::Install { release, artifact } => repo.install(&release, &artifact)?,
        Command::Deploy { release } => repo.deploy(&release)?,
        Command::Ls { path, recursive } => {
            if recursive {
                print_graph(repo, &path)?;
            } else {
                print_listing(repo, &path)?;
            }
        }
        Command::History { path } => print_history(repo, &path)?,
        Command::Clean { path } => repo.clean(&path)?,
    }
    Ok(())
}

fn print_listing(repo: &Repository, path: &str) -> Result<()> {
    let (target, children) = repo.contents(path)?;
    let shown = path.trim().trim_matches('/');
    let shown = if shown.is_empty() { "/" } else { shown };

    println!();
    println!("  Path:                {shown}");
    for (label, value) in target.describe() {
        println!("  {:<20} {value}", format!("{label}:"));
    }
    if !children.is_empty() {
        println!("  Child Count:         {}", children.len());
        println!();
        println!("  Children");
        print_child_table(&children);
    }
    println!();
    Ok(())
}

/// Tabulates child descriptors under the union of their field labels, in
/// order of first appearance, since releases and rlinks carry different
/// fields.
fn print_child_table(children: &BTreeMap<String, Descriptor>) {
    let mut labels: Vec<&'static str> = Vec::new();
    for meta in children.values() {
        for (label, _) in meta.describe() {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }

    let mut header = vec!["Name".to_owned()];
    header.extend(labels.iter().map(|label| label.to_string()));
    let mut rows = vec![header];
    for (name, meta) in children {
        let fields: HashMap<&'static str, String> = meta.describe().into_iter().collect();
        let mut row = vec![name.clone()];
        for label in &labels {
            row.push(fields.get(label).cloned().unwrap_or_default());
        }
        rows.push(row);
    }
    print_table(&rows);
}

fn print_table(rows: &[Vec<String>]) {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (column, cell) in row.iter().enumerate() {
            widths[column] = widths[column].max(cell.len());
        }
    }
    let print_row = |row: &[String]| {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect();
        println!("  | {} |", cells.join(" | "));
    };
    let Some((header, body)) = rows.split_first() else {
        return;
    };
    print_row(header);
    print_row(&widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>());
    for row in body {
        print_row(row);
    }
}

fn type_tag(node_type: NodeType) -> char {
    match node_type {
        NodeType::Root => '*',
        NodeType::Project => 'P',
        NodeType::Release => 'R',
        NodeType::Rlink => 'L',
    }
}

fn print_graph(repo: &Repository, path: &str) -> Result<()> {
    println!();
    repo.walk(path, |node, more, node_type| {
        let name = node.file_name().unwrap_or("/");
        let indent: String = more[..more.len() - 1]
            .iter()
            .map(|has_more| if *has_more { "|  " } else { "   " })
            .collect();
        println!("  {indent}+ [{}] {name}", type_tag(node_type));
    })?;
    println!();
    Ok(())
}

fn print_history(repo: &Repository, path: &str) -> Result<()> {
    let history = repo.history(path)?;
    let mut rows = vec![vec![
        "Target".to_owned(),
        "Modified By".to_owned(),
        "Last Modified".to_owned(),
    ]];
    for entry in &history {
        rows.push(vec![
            entry.target.to_string(),
            entry.modified_by.clone(),
            format_timestamp(entry.modified_time),
        ]);
    }
    println!();
    print_table(&rows);
    println!();
    Ok(())
}
