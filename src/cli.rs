//! Command-line interface: argument types and subcommand execution.
//!
//! The binary is a thin wrapper around [`run`]; everything here is
//! library code so the subcommand behavior is testable. The command
//! registry is the clap command tree itself, threaded as a value — no
//! process-wide registration.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use log::error;

use crate::symbol::{Family, Namespace, Origin, Symbol};
use crate::token::TokenKind;
use crate::unit::{Analyzer, TranslationUnit};

#[derive(Debug, Parser)]
#[command(
    name = "cbranch",
    version,
    about = "C symbol analyzer across all preprocessor configurations",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Input translation unit (repeatable)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub input: Vec<PathBuf>,

    /// Write the branch-track event stream to FILE
    #[arg(long, value_name = "FILE", global = true)]
    pub track: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List commands or print one command's help
    Help {
        /// Command to describe
        command: Option<String>,
    },
    /// List symbols of the analyzed translation units
    Ls(LsArgs),
}

#[derive(Debug, Args, Default)]
pub struct LsArgs {
    /// Restrict to a type: file, symbol, identifier, macro, function,
    /// variable, type, tag, struct, union, enum, label
    #[arg(short = 't', long = "type", value_name = "T")]
    pub object_type: Option<String>,

    /// List literals of a kind: string, char, integer, float
    #[arg(long, value_name = "T")]
    pub literal: Option<String>,

    /// List comments of a kind: block, line
    #[arg(long, value_name = "T")]
    pub comment: Option<String>,

    /// Filter: comma-separated key=value criteria
    /// (name, family, origin, linkage) or a bare substring
    #[arg(short, long, value_name = "CRIT")]
    pub filter: Option<String>,

    /// Long format
    #[arg(short, long)]
    pub long: bool,

    /// Custom format: %n name, %f family, %t type, %o origin,
    /// %k linkage, %c condition
    #[arg(long, value_name = "STR")]
    pub format: Option<String>,

    /// One line per declaration/definition instead of one per symbol
    #[arg(long)]
    pub each: bool,

    /// Assume a condition true (repeatable)
    #[arg(long, value_name = "COND")]
    pub assume: Vec<String>,

    /// Shorthand for --assume 'defined(NAME)' (repeatable)
    #[arg(long = "assume-def", value_name = "NAME")]
    pub assume_def: Vec<String>,

    /// Restrict to these identifiers
    pub object: Vec<String>,
}

/// Executes a parsed invocation. Returns the process exit code.
pub fn run(cli: Cli, out: &mut impl Write) -> io::Result<i32> {
    match cli.command {
        Command::Help { command } => {
            run_help(command.as_deref(), out)?;
            Ok(0)
        }
        Command::Ls(args) => run_ls(&cli.input, &cli.track, &args, out),
    }
}

/// `help` with no argument lists all registered commands; with a known
/// command prints its option help; an unknown name is reported and the
/// exit code stays 0.
pub fn run_help(command: Option<&str>, out: &mut impl Write) -> io::Result<()> {
    let registry = Cli::command();
    match command {
        None => {
            for sub in registry.get_subcommands() {
                writeln!(
                    out,
                    "{}\t- {}",
                    sub.get_name(),
                    sub.get_about().map(|a| a.to_string()).unwrap_or_default()
                )?;
            }
        }
        Some(name) => match registry.find_subcommand(name) {
            Some(sub) => {
                write!(out, "{}", sub.clone().render_help())?;
            }
            None => {
                writeln!(out, "Unknown command: `{}'", name)?;
            }
        },
    }
    Ok(())
}

fn run_ls(
    inputs: &[PathBuf],
    track: &Option<PathBuf>,
    args: &LsArgs,
    out: &mut impl Write,
) -> io::Result<i32> {
    if inputs.is_empty() {
        error!("no input files (use --input FILE)");
        return Ok(1);
    }

    let mut analyzer = Analyzer::new();
    for name in &args.assume_def {
        analyzer.assume_defined(name);
    }
    for text in &args.assume {
        if let Err(err) = analyzer.assume(text) {
            error!("bad --assume `{}': {}", text, err);
            return Ok(1);
        }
    }

    let mut failed = false;
    let mut track_sink = match track {
        Some(path) => Some(File::create(path)?),
        None => None,
    };

    for input in inputs {
        let unit = match analyzer.analyze_file(input) {
            Ok(unit) => unit,
            Err(err) => {
                error!("{}: {}", input.display(), err);
                failed = true;
                continue;
            }
        };
        for line in list_unit(&unit, args) {
            writeln!(out, "{}", line)?;
        }
        if let Some(sink) = track_sink.as_mut() {
            unit.track.write_jsonl(sink)?;
        }
    }

    Ok(if failed { 1 } else { 0 })
}

/// Produces the `ls` output lines for one translation unit.
pub fn list_unit(unit: &TranslationUnit, args: &LsArgs) -> Vec<String> {
    if let Some(kind) = &args.literal {
        return list_captured(unit, &unit.literals, literal_kinds(kind), args);
    }
    if let Some(kind) = &args.comment {
        return list_captured(unit, &unit.comments, comment_kinds(kind), args);
    }
    if args.object_type.as_deref() == Some("file") {
        let mut lines = vec![unit.main_file.clone()];
        lines.extend(unit.includes.iter().cloned());
        return lines;
    }

    let families = args.object_type.as_deref().map(family_filter);
    let mut lines = Vec::new();
    for sym in unit.index.iter() {
        if let Some(Some(families)) = &families {
            if !families.contains(&sym.family) {
                continue;
            }
        }
        if !args.object.is_empty() && !args.object.contains(&sym.identifier) {
            continue;
        }
        if let Some(filter) = &args.filter {
            if !matches_filter(sym, filter) {
                continue;
            }
        }
        if args.each {
            for loc in &sym.declarations {
                lines.push(format!("{}\tdecl\t{}\t{}", sym.identifier, loc, cond_of(unit, sym)));
            }
            for loc in &sym.definitions {
                lines.push(format!("{}\tdefn\t{}\t{}", sym.identifier, loc, cond_of(unit, sym)));
            }
        } else {
            lines.push(render_symbol(unit, sym, args));
        }
    }
    lines
}

fn cond_of(unit: &TranslationUnit, sym: &Symbol) -> String {
    unit.display_cond(sym.existence)
}

fn render_symbol(unit: &TranslationUnit, sym: &Symbol, args: &LsArgs) -> String {
    if let Some(format) = &args.format {
        return render_format(unit, sym, format);
    }
    if args.long {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            sym.identifier,
            sym.family,
            sym.type_info,
            sym.linkage,
            sym.origin,
            cond_of(unit, sym)
        )
    } else {
        sym.identifier.clone()
    }
}

fn render_format(unit: &TranslationUnit, sym: &Symbol, format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push_str(&sym.identifier),
            Some('f') => out.push_str(&sym.family.to_string()),
            Some('t') => out.push_str(&sym.type_info.to_string()),
            Some('o') => out.push_str(&sym.origin.to_string()),
            Some('k') => out.push_str(&sym.linkage.to_string()),
            Some('c') => out.push_str(&cond_of(unit, sym)),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn list_captured(
    unit: &TranslationUnit,
    captured: &[crate::parser::Captured],
    kinds: Vec<TokenKind>,
    args: &LsArgs,
) -> Vec<String> {
    captured
        .iter()
        .filter(|c| kinds.iter().any(|k| kind_matches(*k, c.token.kind)))
        .map(|c| {
            if args.long {
                format!("{}\t{}\t{}", c.token.text, c.token.loc, unit.display_cond(c.cond))
            } else {
                c.token.text.clone()
            }
        })
        .collect()
}

fn kind_matches(filter: TokenKind, actual: TokenKind) -> bool {
    match (filter, actual) {
        (TokenKind::BlockComment { .. }, TokenKind::BlockComment { .. }) => true,
        (a, b) => a == b,
    }
}

fn literal_kinds(kind: &str) -> Vec<TokenKind> {
    match kind {
        "string" => vec![TokenKind::StringLiteral],
        "char" => vec![TokenKind::CharLiteral],
        "integer" => vec![TokenKind::IntLiteral],
        "float" => vec![TokenKind::FloatLiteral],
        _ => Vec::new(),
    }
}

fn comment_kinds(kind: &str) -> Vec<TokenKind> {
    match kind {
        "block" => vec![TokenKind::BlockComment { complete: true }],
        "line" => vec![TokenKind::LineComment],
        _ => Vec::new(),
    }
}

/// Maps a `-t` value onto the families it admits. `None` means no
/// restriction (`symbol`, `identifier`).
fn family_filter(object_type: &str) -> Option<Vec<Family>> {
    match object_type {
        "symbol" | "identifier" => None,
        "macro" => Some(vec![Family::MacroObject, Family::MacroFunction]),
        "function" => Some(vec![Family::Function]),
        "variable" => Some(vec![Family::Variable]),
        "type" => Some(vec![Family::Typedef]),
        "tag" => Some(vec![Family::TagStruct, Family::TagUnion, Family::TagEnum]),
        "struct" => Some(vec![Family::TagStruct]),
        "union" => Some(vec![Family::TagUnion]),
        "enum" => Some(vec![Family::TagEnum]),
        "label" => Some(vec![Family::Label]),
        _ => Some(Vec::new()),
    }
}

/// Comma-separated criteria; each is `key=value` over name, family,
/// origin, linkage, namespace, or a bare substring of the identifier.
fn matches_filter(sym: &Symbol, filter: &str) -> bool {
    filter.split(',').all(|clause| {
        let clause = clause.trim();
        match clause.split_once('=') {
            Some(("name", v)) => sym.identifier == v,
            Some(("family", v)) => sym.family.to_string() == v,
            Some(("origin", v)) => sym.origin.to_string() == v || origin_name(&sym.origin) == v,
            Some(("linkage", v)) => sym.linkage.to_string() == v,
            Some(("namespace", v)) => namespace_name(sym.namespace()) == v,
            Some((_, _)) => false,
            None => sym.identifier.contains(clause),
        }
    })
}

fn origin_name(origin: &Origin) -> &str {
    match origin {
        Origin::File => "file",
        Origin::Function(name) => name,
    }
}

fn namespace_name(ns: Namespace) -> &'static str {
    match ns {
        Namespace::Ordinary => "ordinary",
        Namespace::Tag => "tag",
        Namespace::Label => "label",
        Namespace::Macro => "macro",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> TranslationUnit {
        Analyzer::new().analyze_source("test.c", source).unwrap()
    }

    #[test]
    fn test_help_lists_commands() {
        let mut out = Vec::new();
        run_help(None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().any(|l| l.starts_with("ls\t- ")));
        assert!(text.lines().any(|l| l.starts_with("help\t- ")));
    }

    #[test]
    fn test_help_unknown_command() {
        let mut out = Vec::new();
        run_help(Some("bogus"), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Unknown command: `bogus'\n");
    }

    #[test]
    fn test_help_ls_prints_options() {
        let mut out = Vec::new();
        run_help(Some("ls"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("--type"));
        assert!(text.contains("--assume"));
    }

    #[test]
    fn test_ls_default_lists_names() {
        let unit = analyze("int x;\nfloat y;\n");
        let lines = list_unit(&unit, &LsArgs::default());
        assert_eq!(lines, vec!["x", "y"]);
    }

    #[test]
    fn test_ls_type_filter() {
        let unit = analyze("#define M 1\nint x;\nstruct s { int a; };\n");
        let args = LsArgs { object_type: Some("macro".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["M"]);
        let args = LsArgs { object_type: Some("struct".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["s"]);
    }

    #[test]
    fn test_ls_objects_restrict() {
        let unit = analyze("int x;\nint y;\n");
        let args = LsArgs { object: vec!["y".into()], ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["y"]);
    }

    #[test]
    fn test_ls_format() {
        let unit = analyze("#ifdef A\nint x;\n#endif\n");
        let args = LsArgs { format: Some("%n [%c]".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["x [defined(A)]"]);
    }

    #[test]
    fn test_ls_literals() {
        let unit = analyze("int x = 42;\nchar *s = \"hi\";\n");
        let args = LsArgs { literal: Some("string".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["\"hi\""]);
        let args = LsArgs { literal: Some("integer".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["42"]);
    }

    #[test]
    fn test_ls_comments() {
        let unit = analyze("// line one\nint x; /* block */\n");
        let args = LsArgs { comment: Some("line".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["// line one"]);
        let args = LsArgs { comment: Some("block".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["/* block */"]);
    }

    #[test]
    fn test_ls_filter_criteria() {
        let unit = analyze("static int hidden;\nint shown;\n");
        let args = LsArgs { filter: Some("linkage=intern".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["hidden"]);
        let args = LsArgs { filter: Some("show".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["shown"]);
    }

    #[test]
    fn test_ls_file_listing() {
        let unit = analyze("#include <stdio.h>\nint x;\n");
        let args = LsArgs { object_type: Some("file".into()), ..Default::default() };
        assert_eq!(list_unit(&unit, &args), vec!["test.c", "stdio.h"]);
    }
}
