//! Terminal output helpers built on `colored`.

use colored::Colorize;

pub fn banner() {
    println!("  {} {}", ">>".bright_cyan().bold(), "chatsync".bold());
    println!("     {}", "IRC, Tox and file relay hub".dimmed());
}

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Yellow dash, used for skipped channels.
pub fn warn(msg: &str) {
    println!("  {} {}", "-".bright_yellow(), msg.yellow());
}

pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

pub fn error_with_fix(msg: &str, fix: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
    eprintln!("    {} {}", "fix:".bright_yellow(), fix);
}

pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

pub fn blank() {
    println!();
}
