//! A dev-only text REPL over `simfs::System`: mkdir, ls, cd, pwd, touch, rm,
//! rmdir, open, close, read, write, oft, logout, exit. Exists for manual
//! testing only and carries none of the crate's invariants — see
//! `System`'s own doc comment for the real contract.

use std::io::{self, Write as _};
use std::mem::MaybeUninit;
use std::time::{Duration, SystemTime};

use libc::{tcgetattr, tcsetattr, termios, ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN};
use simfs::model::OpenMode;
use simfs::System;

/// Shows a prompt and reads a line, masking input with termios when
/// `hidden` is set. Mirrors the teacher's `utils::prompt::prompt`.
fn prompt(text: &str, hidden: bool) -> Option<String> {
    let saved = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    if hidden {
        let mut raw = saved;
        raw.c_lflag &= !(ICANON | ECHO | ECHOE);
        raw.c_cc[VMIN] = 1;
        unsafe {
            tcsetattr(STDIN_FILENO, TCSANOW, &raw);
        }
    }
    print!("{text}");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let read = io::stdin().read_line(&mut line).ok()?;
    if hidden {
        println!();
        unsafe {
            tcsetattr(STDIN_FILENO, TCSANOW, &saved);
        }
    }
    if read == 0 {
        return None;
    }
    Some(line.trim_end_matches('\n').to_string())
}

/// Runs `f`, then sleeps out the remainder of `d` — the same constant-time
/// login padding the teacher's `login::main` wraps its password check in,
/// kept here at the CLI layer rather than in `auth::login` itself.
fn exec_wait<T>(d: Duration, f: impl FnOnce() -> T) -> T {
    let start = SystemTime::now();
    let result = f();
    while SystemTime::now().duration_since(start).unwrap_or(Duration::ZERO) < d {
        std::thread::sleep(Duration::from_millis(1));
    }
    result
}

fn login_loop(sys: &mut System) {
    loop {
        let Some(username) = prompt("login: ", false) else { return };
        let Some(password) = prompt("Password: ", true) else { return };
        let result = exec_wait(Duration::from_millis(500), || sys.login(&username, &password));
        match result {
            Ok(()) => return,
            Err(e) => eprintln!("login incorrect: {e}"),
        }
    }
}

fn main() {
    let image_path = std::env::args().nth(1).unwrap_or_else(|| simfs::persistence::DEFAULT_IMAGE_PATH.to_string());
    let mut sys = System::new(&image_path).unwrap_or_else(|e| {
        eprintln!("simfs-shell: cannot initialise: {e}");
        std::process::exit(1);
    });

    match sys.load_disk_image() {
        Ok(true) => println!("loaded existing image at {image_path}"),
        Ok(false) => {
            println!("no image at {image_path}; formatting a fresh disk");
            if let Err(e) = sys.format_disk(Default::default()) {
                eprintln!("simfs-shell: format failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("simfs-shell: cannot load image: {e}");
            std::process::exit(1);
        }
    }

    login_loop(&mut sys);
    println!("welcome, {}", sys.session().map(|s| s.username.as_str()).unwrap_or("?"));

    let stdin = io::stdin();
    loop {
        print!("simfs> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let words: Vec<&str> = line.trim().split_whitespace().collect();
        let Some(&cmd) = words.first() else { continue };

        let result = run_command(&mut sys, cmd, &words[1..]);
        if let Err(e) = result {
            eprintln!("simfs-shell: {e}");
        }
        if cmd == "exit" {
            break;
        }
    }

    if let Err(e) = sys.save_disk_image() {
        eprintln!("simfs-shell: failed to save image on exit: {e}");
    }
}

fn run_command(sys: &mut System, cmd: &str, args: &[&str]) -> Result<(), String> {
    match cmd {
        "mkdir" => {
            let path = args.first().ok_or("usage: mkdir <path>")?;
            sys.make_directory(path).map(|_| ()).map_err(|e| e.to_string())
        }
        "rmdir" => {
            let path = args.first().ok_or("usage: rmdir <path>")?;
            sys.remove_directory(path).map_err(|e| e.to_string())
        }
        "ls" => {
            let path = args.first().copied().unwrap_or(".");
            let entries = sys.list_directory(path).map_err(|e| e.to_string())?;
            for entry in entries {
                println!(
                    "{} {:>8} {} {}",
                    entry.permissions.to_rwx_string(),
                    entry.size,
                    entry.owner_uid,
                    entry.name
                );
            }
            Ok(())
        }
        "cd" => {
            let path = args.first().ok_or("usage: cd <path>")?;
            sys.change_directory(path).map_err(|e| e.to_string())
        }
        "pwd" => {
            println!("(cwd is tracked by inode id only in this demo shell)");
            Ok(())
        }
        "touch" | "create" => {
            let path = args.first().ok_or("usage: touch <path>")?;
            sys.create_file(path).map(|_| ()).map_err(|e| e.to_string())
        }
        "rm" => {
            let path = args.first().ok_or("usage: rm <path>")?;
            sys.delete_file(path).map_err(|e| e.to_string())
        }
        "open" => {
            let path = args.first().ok_or("usage: open <path> [r|w|a|r+]")?;
            let mode = args
                .get(1)
                .and_then(|m| OpenMode::parse(m))
                .unwrap_or(OpenMode::Read);
            let fd = sys.open_file(path, mode).map_err(|e| e.to_string())?;
            println!("fd {fd}");
            Ok(())
        }
        "close" => {
            let fd: u32 = args.first().ok_or("usage: close <fd>")?.parse().map_err(|_| "bad fd".to_string())?;
            sys.close_file(fd).map_err(|e| e.to_string())
        }
        "read" => {
            let fd: u32 = args.first().ok_or("usage: read <fd> [n]")?.parse().map_err(|_| "bad fd".to_string())?;
            let n: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(4096);
            let bytes = sys.read_file(fd, n).map_err(|e| e.to_string())?;
            println!("{}", String::from_utf8_lossy(&bytes));
            Ok(())
        }
        "write" => {
            let fd: u32 = args.first().ok_or("usage: write <fd> <text>")?.parse().map_err(|_| "bad fd".to_string())?;
            let text = args[1..].join(" ");
            let outcome = sys.write_file(fd, text.as_bytes()).map_err(|e| e.to_string())?;
            if outcome.out_of_space {
                println!("wrote {} bytes (disk full, write truncated)", outcome.bytes_written);
            }
            Ok(())
        }
        "logout" => {
            sys.logout();
            Ok(())
        }
        "exit" => Ok(()),
        "" => Ok(()),
        other => Err(format!("unknown command '{other}'")),
    }
}
