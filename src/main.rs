use board_sync::app::Command;

const HELP: &str = "board-sync: read a discussion board from the terminal.

  --version, -V        Show version and exit
  --help,    -h        Show this help message
  --page <n>           Print page n of the global feed (default 1)
  --search <query>     Print the first page of search results
  --hide <post-id>     Hide a post on this device
  --set-cookie <value> Save the session cookie used to sign in";

fn main() {
    let command = match handle_cli_flags(std::env::args().skip(1)) {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = board_sync::run(command) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was fully handled here.
fn handle_cli_flags(mut args: impl Iterator<Item = String>) -> Result<Option<Command>, String> {
    let mut command = Command::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("board-sync {}", board_sync::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--page" => {
                let value = args.next().ok_or("--page needs a number")?;
                let page = value
                    .parse::<u32>()
                    .ok()
                    .filter(|page| *page > 0)
                    .ok_or_else(|| format!("invalid page: {value}"))?;
                command = Command::Page(page);
            }
            "--search" => {
                let query = args.next().ok_or("--search needs a query")?;
                command = Command::Search(query);
            }
            "--hide" => {
                let id = args.next().ok_or("--hide needs a post id")?;
                command = Command::Hide(id);
            }
            "--set-cookie" => {
                let cookie = args.next().ok_or("--set-cookie needs a value")?;
                command = Command::SetCookie(cookie);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(command))
}
