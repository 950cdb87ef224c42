use colored::*;
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_API_ADDR: &str = "127.0.0.1:9002";

/// Shared implementation of the `goalleader-cli` binary
pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("goalleader-cli")
        .to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let command = &args[1];
    let api = ApiClient::new(&api_addr())?;

    match command.as_str() {
        "ask" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} ask <message>", bin).yellow());
                return Ok(());
            }
            ask(&api, &args[2..].join(" "))?;
        }
        "contacts" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} contacts <user>", bin).yellow());
                return Ok(());
            }
            list_contacts(&api, &args[2])?;
        }
        "send" => {
            if args.len() < 5 {
                eprintln!("{}", format!("Usage: {} send <from> <to> <message>", bin).yellow());
                return Ok(());
            }
            send_message(&api, &args[2], &args[3], &args[4..].join(" "))?;
        }
        "status" => {
            show_status(&api)?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "🎯 GoalLeader CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <message>              Ask the dashboard assistant", "ask".cyan());
    println!("  {} <user>            List a user's contacts", "contacts".cyan());
    println!("  {} <from> <to> <message>  Send a chat message", "send".cyan());
    println!("  {}                     Show server diagnostics", "status".cyan());
    println!();
    println!(
        "  {} {}",
        "Server address:".dimmed(),
        "GOALLEADER_API_ADDR (default 127.0.0.1:9002)".yellow()
    );
}

fn api_addr() -> String {
    std::env::var("GOALLEADER_API_ADDR").unwrap_or_else(|_| DEFAULT_API_ADDR.to_string())
}

/// JSON client for the GoalLeader HTTP API
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(addr: &str) -> anyhow::Result<Self> {
        // The assistant may take a while to answer
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}", addr),
        })
    }

    /// Send one request; returns the status code and JSON body
    pub fn request(&self, method: Method, path: &str, body: Option<&Value>) -> anyhow::Result<(u16, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .map_err(|e| anyhow::anyhow!("Could not reach GoalLeader API at {}: {}", self.base_url, e))?;
        let status = resp.status().as_u16();
        let json = resp.json::<Value>().unwrap_or(Value::Null);
        Ok((status, json))
    }
}

fn fail(resp: &Value) -> ! {
    let error = resp["error"].as_str().unwrap_or("Unknown error");
    eprintln!("{} Error: {}", "✗".red().bold(), error.red());
    if let Some(details) = resp["details"].as_str() {
        eprintln!("  {}", details.dimmed());
    }
    std::process::exit(1);
}

fn ask(api: &ApiClient, message: &str) -> anyhow::Result<()> {
    let body = serde_json::json!({ "message": message });
    let (status, resp) = api.request(Method::POST, "/api/chat", Some(&body))?;
    if status != 200 {
        fail(&resp);
    }
    println!("{} {}", "🤖".bright_cyan(), resp["output"].as_str().unwrap_or(""));
    Ok(())
}

fn list_contacts(api: &ApiClient, user: &str) -> anyhow::Result<()> {
    let path = format!("/api/contacts?user={}", urlencoding::encode(user));
    let (status, resp) = api.request(Method::GET, &path, None)?;
    if status != 200 {
        fail(&resp);
    }

    let contacts = resp["contacts"].as_array().cloned().unwrap_or_default();
    println!(
        "{}",
        format!("Contacts of {} ({})", user, contacts.len())
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for c in contacts {
        let name = c["name"].as_str().unwrap_or("?").cyan();
        let role = c["role"].as_str().unwrap_or("").dimmed();
        let status_str = c["status"].as_str().unwrap_or("?");
        let status = if status_str == "online" {
            status_str.green()
        } else {
            status_str.yellow()
        };
        let unread = c["unreadCount"]
            .as_u64()
            .map(|n| format!(" ({} unread)", n).red().to_string())
            .unwrap_or_default();
        println!("  {} {} [{}]{}", name, role, status, unread);
        if let Some(last) = c["lastMessage"].as_str().filter(|s| !s.is_empty()) {
            println!("      {} {}", c["lastMessageTime"].as_str().unwrap_or("").dimmed(), last);
        }
    }
    Ok(())
}

fn send_message(api: &ApiClient, from: &str, to: &str, content: &str) -> anyhow::Result<()> {
    let body = serde_json::json!({ "from": from, "to": to, "content": content });
    let (status, resp) = api.request(Method::POST, "/api/messages", Some(&body))?;
    if status != 200 {
        fail(&resp);
    }
    let id = resp["message"]["id"].as_str().unwrap_or("?");
    println!("{} Message sent! ID: {}", "✓".green().bold(), id.cyan());
    Ok(())
}

fn show_status(api: &ApiClient) -> anyhow::Result<()> {
    let (status, resp) = api.request(Method::GET, "/api/chat", None)?;
    if status != 200 {
        fail(&resp);
    }

    let line = |label: &str, value: String| {
        println!("{} {}", "│".bright_cyan(), format!("{:<14} {}", label, value).bright_white());
    };
    println!(
        "{}",
        "╭─ GoalLeader Server Status ────────────────────────────────────╮".bright_cyan()
    );
    let overall = resp["status"].as_str().unwrap_or("?");
    line(
        "Status:",
        if overall == "ok" {
            overall.green().to_string()
        } else {
            overall.red().to_string()
        },
    );
    line("Environment:", resp["environment"].as_str().unwrap_or("?").cyan().to_string());
    line("Store:", resp["connectivity"]["store"].as_str().unwrap_or("?").to_string());
    line(
        "Assistant:",
        format!(
            "{} ({})",
            resp["flags"]["model"].as_str().unwrap_or("?").cyan(),
            resp["connectivity"]["promptService"].as_str().unwrap_or("?")
        ),
    );
    if let Some(usage) = resp["usage"].as_array() {
        for flow in usage {
            line(
                &format!("{}:", flow["flow"].as_str().unwrap_or("?")),
                format!(
                    "{} requests, {} fallbacks",
                    flow["requests"].as_u64().unwrap_or(0),
                    flow["fallbacks"].as_u64().unwrap_or(0)
                ),
            );
        }
    }
    println!(
        "{}",
        "╰───────────────────────────────────────────────────────────────╯".bright_cyan()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answer one request with a chunked JSON body; returns the request text
    fn serve_once(listener: TcpListener, chunks: Vec<&'static str>) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text
                        .to_ascii_lowercase()
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .map(|v| v.parse::<usize>().unwrap())
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let mut response = String::from(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            );
            for chunk in chunks {
                response.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
            }
            response.push_str("0\r\n\r\n");
            socket.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        })
    }

    #[test]
    fn test_request_reads_chunked_json() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = serve_once(listener, vec![r#"{"output":"Focus "#, r#"on one goal"}"#]);

        let api = ApiClient::new(&addr).unwrap();
        let body = serde_json::json!({ "message": "what next?" });
        let (status, resp) = api.request(Method::POST, "/api/chat", Some(&body)).unwrap();
        assert_eq!(status, 200);
        assert_eq!(resp["output"], "Focus on one goal");

        let raw = server.join().unwrap();
        assert!(raw.starts_with("POST /api/chat HTTP/1.1"));
        assert!(raw.contains(r#""message":"what next?""#));
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let api = ApiClient::new(&addr).unwrap();
        let err = api.request(Method::GET, "/api/chat", None).unwrap_err();
        assert!(err.to_string().contains("Could not reach GoalLeader API"));
    }
}
