use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{bail, Result};
use colored::Colorize;

use crate::form::{length_hint, FormInput, LengthLevel, Subject, MESSAGE_MAX_CHARS};

/// Fill in whatever the command line left blank. Non-interactive sessions get
/// the input back unchanged and validation reports the gaps.
pub(crate) fn complete_input(mut input: FormInput) -> Result<FormInput> {
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Ok(input);
    }

    println!();
    println!("{}", "Contact form".bright_cyan().bold());
    println!(
        "  {}",
        "Fields marked * are required. Press Enter to skip optional ones.".bright_black()
    );
    println!();

    if input.name.trim().is_empty() {
        input.name = prompt_line("Name*: ")?;
    }
    if input.email.trim().is_empty() {
        input.email = prompt_line("Email*: ")?;
    }
    if input.phone.is_none() {
        let phone = prompt_line("Phone: ")?;
        input.phone = (!phone.trim().is_empty()).then_some(phone);
    }
    if input.subject.trim().is_empty() {
        let index = prompt_choice(
            "Subject*:",
            &Subject::ALL
                .iter()
                .map(|s| format!("{:<12} {}", s.label(), s.description()))
                .collect::<Vec<_>>(),
        )?;
        input.subject = Subject::ALL[index].label().to_string();
    }
    if input.message.trim().is_empty() {
        println!(
            "{}",
            "Message* (press Enter on an empty line to finish):".bright_white()
        );
        input.message = read_multiline_message()?;
        println!("  {}", length_badge(input.message.trim().chars().count()));
    }

    Ok(input)
}

/// `N/500`, coloured by how close the message is to the limit.
pub(crate) fn length_badge(chars: usize) -> colored::ColoredString {
    let text = format!("{chars}/{MESSAGE_MAX_CHARS}");
    match length_hint(chars) {
        LengthLevel::Normal => text.bright_black(),
        LengthLevel::Warning => text.bright_yellow(),
        LengthLevel::Critical => text.bright_red(),
    }
}

pub(crate) fn prompt_yes_no(prompt: &str, default_yes: bool) -> Result<bool> {
    loop {
        print!("{prompt}");
        let _ = io::stdout().flush();

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let trimmed = input.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Ok(default_yes);
        }
        match trimmed.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => {
                println!("{}", "Please answer y or n.".bright_yellow());
            }
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt.bright_white());
    let _ = io::stdout().flush();

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_choice(prompt: &str, options: &[String]) -> Result<usize> {
    loop {
        println!("{}", prompt.bright_white());
        for (i, opt) in options.iter().enumerate() {
            println!("  {} {}", format!("{:>2}.", i + 1).bright_black(), opt);
        }
        print!("{} ", "Enter a number:".bright_yellow());
        let _ = io::stdout().flush();

        match read_choice(&mut io::stdin().lock(), options.len())? {
            Some(index) => return Ok(index),
            None => {
                println!("{}", "Invalid choice. Try again.".bright_red());
                println!();
            }
        }
    }
}

/// One answer to a numbered menu. A closed input is an error, not a retry.
fn read_choice(reader: &mut impl BufRead, option_count: usize) -> Result<Option<usize>> {
    let mut input = String::new();
    if reader.read_line(&mut input)? == 0 {
        bail!("input closed before a choice was made");
    }
    Ok(parse_choice(&input, option_count))
}

fn parse_choice(input: &str, option_count: usize) -> Option<usize> {
    let n = input.trim().parse::<usize>().ok()?;
    (1..=option_count).contains(&n).then(|| n - 1)
}

fn read_multiline_message() -> Result<String> {
    let mut lines = Vec::new();
    loop {
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let line = input.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            break;
        }
        lines.push(line.to_string());
    }
    Ok(lines.join("\n"))
}
