//! Tagged, color-aware console output for user-facing listings.

use colored::Colorize;

/// Whether colored output is appropriate: disabled by `NO_COLOR`, dumb
/// terminals and CI environments.
pub fn use_colored_output() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" || term == "unknown" {
            return false;
        }
    }
    if std::env::var("CI").is_ok() || std::env::var("CONTINUOUS_INTEGRATION").is_ok() {
        return false;
    }
    true
}

pub fn print_status(tag: &str, message: &str) {
    println!("[{}] {}", tag, message);
}

pub fn print_colored(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_blue().bold(), message);
    } else {
        println!("[{}] {}", tag, message);
    }
}

pub fn print_error(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_red().bold(), message);
    } else {
        println!("[{}] {}", tag, message);
    }
}

pub fn print_success(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_green().bold(), message);
    } else {
        println!("[{}] {}", tag, message);
    }
}

pub fn print_info(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_yellow(), message);
    } else {
        println!("[{}] {}", tag, message);
    }
}
