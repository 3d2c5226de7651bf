//! Read-only host fact collection (`sys_info`, `priv_check`).
//!
//! These always succeed: a fact that cannot be gathered is omitted from the
//! map rather than reported as an error.

use serde_json::{Map, Value};

/// Static host facts as a flat key/value structure.
pub async fn system_info() -> String {
    let mut info = Map::new();

    if let Ok(hostname) = hostname::get()
        && let Ok(hostname) = hostname.into_string()
    {
        info.insert("hostname".into(), Value::String(hostname));
    }
    info.insert("os".into(), Value::String(std::env::consts::OS.into()));
    info.insert("arch".into(), Value::String(std::env::consts::ARCH.into()));
    if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME"))
        && !user.is_empty()
    {
        info.insert("user".into(), Value::String(user));
    }

    if cfg!(target_os = "linux") {
        if let Some(kernel) = query("uname", &["-r"]).await {
            info.insert("kernel".into(), Value::String(kernel));
        }
        if let Ok(release) = tokio::fs::read_to_string("/etc/os-release").await
            && let Some(pretty) = parse_pretty_name(&release)
        {
            info.insert("os_version".into(), Value::String(pretty));
        }
    } else if cfg!(windows)
        && let Some(version) = query("cmd", &["/c", "ver"]).await
    {
        info.insert("os_version".into(), Value::String(version));
    }

    serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string())
}

/// Privilege posture: effective uid / root flag and a passwordless-sudo
/// probe on unix, an administrator probe elsewhere.
pub async fn privilege_info() -> String {
    let mut info = Map::new();

    if cfg!(unix) {
        if let Some(uid) = query("id", &["-u"]).await {
            info.insert("is_root".into(), Value::Bool(uid == "0"));
            info.insert("uid".into(), Value::String(uid));
        }
        let has_sudo = command_succeeds("sudo", &["-n", "true"]).await;
        info.insert("has_sudo".into(), Value::Bool(has_sudo));
    } else if cfg!(windows) {
        let is_admin = command_succeeds("net", &["session"]).await;
        info.insert("is_admin".into(), Value::Bool(is_admin));
    }

    serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string())
}

async fn query(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .is_ok_and(|output| output.status.success())
}

/// `PRETTY_NAME="Ubuntu 24.04 LTS"` → `Ubuntu 24.04 LTS`
fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_info_is_flat_json_with_core_facts() {
        let raw = system_info().await;
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let map = parsed.as_object().unwrap();
        assert_eq!(map["os"], std::env::consts::OS);
        assert_eq!(map["arch"], std::env::consts::ARCH);
        assert!(map.values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[tokio::test]
    async fn privilege_info_never_fails() {
        let raw = privilege_info().await;
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_object());
        #[cfg(unix)]
        assert!(parsed.get("has_sudo").is_some());
    }

    #[test]
    fn pretty_name_is_unquoted() {
        let release = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\nID=ubuntu\n";
        assert_eq!(
            parse_pretty_name(release).as_deref(),
            Some("Ubuntu 24.04 LTS")
        );
    }

    #[test]
    fn pretty_name_absent_yields_none() {
        assert_eq!(parse_pretty_name("NAME=\"Ubuntu\"\n"), None);
    }
}
