//! Text formatters for list/info/grep output
//!
//! Formatted results go to stdout; `call` bypasses this module entirely
//! and prints the raw MCP result.

use mcpq_config::{ServerRecord, Transport};
use mcpq_connection::FanoutResult;
use mcpq_transport::ToolDescriptor;

/// The default (no-subcommand) listing: every server with its tools, or
/// its error when unreachable.
pub fn print_server_list(results: &[FanoutResult<Vec<ToolDescriptor>>], with_descriptions: bool) {
    for result in results {
        match &result.outcome {
            Ok(tools) => {
                println!("{} ({} tools)", result.server, tools.len());
                for tool in tools {
                    print_tool_line(tool, with_descriptions);
                }
            }
            Err(message) => {
                println!("{} (unavailable: {})", result.server, first_line(message));
            }
        }
    }
}

pub fn print_server_info(
    record: &ServerRecord,
    tools: &[ToolDescriptor],
    instructions: Option<&str>,
    with_descriptions: bool,
) {
    println!("{}", record.name);
    match &record.transport {
        Transport::Stdio(stdio) => {
            let mut command = stdio.command.clone();
            if !stdio.args.is_empty() {
                command = format!("{command} {}", stdio.args.join(" "));
            }
            println!("  transport: stdio ({command})");
        }
        Transport::Http(http) => {
            println!("  transport: http ({})", http.url);
            if http.oauth.is_some() {
                println!("  auth: oauth");
            }
        }
    }
    if !record.allowed_tools.is_empty() {
        println!("  allowedTools: {}", record.allowed_tools.join(", "));
    }
    if !record.disabled_tools.is_empty() {
        println!("  disabledTools: {}", record.disabled_tools.join(", "));
    }
    if let Some(instructions) = instructions {
        println!("  Instructions:");
        for line in instructions.lines() {
            println!("    {line}");
        }
    }
    println!("  Tools ({}):", tools.len());
    for tool in tools {
        print_tool_line(tool, with_descriptions);
    }
}

pub fn print_tool_info(server: &str, tool: &ToolDescriptor) {
    println!("{server}/{}", tool.name);
    if let Some(description) = &tool.description {
        println!("  {description}");
    }
    match serde_json::to_string_pretty(&tool.input_schema) {
        Ok(schema) => {
            println!("  Input schema:");
            for line in schema.lines() {
                println!("    {line}");
            }
        }
        Err(_) => println!("  Input schema: <unavailable>"),
    }
}

pub fn print_grep_matches(matches: &[(String, ToolDescriptor)], with_descriptions: bool) {
    for (server, tool) in matches {
        if with_descriptions {
            match &tool.description {
                Some(description) => println!("{server}/{} - {}", tool.name, first_line(description)),
                None => println!("{server}/{}", tool.name),
            }
        } else {
            println!("{server}/{}", tool.name);
        }
    }
}

fn print_tool_line(tool: &ToolDescriptor, with_descriptions: bool) {
    if with_descriptions {
        match &tool.description {
            Some(description) => println!("  {} - {}", tool.name, first_line(description)),
            None => println!("  {}", tool.name),
        }
    } else {
        println!("  {}", tool.name);
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
