use serde::Deserialize;
use serde::Serialize;
use std::fs::File;
use std::fs::OpenOptions;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct AuthDotJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub fn get_auth_file(parley_home: &Path) -> PathBuf {
    parley_home.join("auth.json")
}

/// Delete the auth.json file inside `parley_home` if it exists. Returns `Ok(true)`
/// if a file was removed, `Ok(false)` if no auth file was present.
pub fn logout(parley_home: &Path) -> std::io::Result<bool> {
    let auth_file = get_auth_file(parley_home);
    match std::fs::remove_file(&auth_file) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn try_read_auth_json(auth_file: &Path) -> std::io::Result<AuthDotJson> {
    let mut file = File::open(auth_file)?;
    let mut contents = String::new();
    use std::io::Read as _;
    file.read_to_string(&mut contents)?;
    let auth_dot_json: AuthDotJson = serde_json::from_str(&contents)?;
    Ok(auth_dot_json)
}

fn write_auth_json(auth_file: &Path, auth_dot_json: &AuthDotJson) -> std::io::Result<()> {
    let json_data = serde_json::to_string_pretty(auth_dot_json)?;
    let mut options = OpenOptions::new();
    options.truncate(true).write(true).create(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(auth_file)?;
    use std::io::Write as _;
    file.write_all(json_data.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Store a bearer token (and optionally the identity it belongs to) in
/// `parley_home/auth.json`, creating the directory if needed.
pub fn login_with_token(
    parley_home: &Path,
    token: &str,
    user_id: Option<String>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(parley_home)?;
    let auth_dot_json = AuthDotJson {
        token: Some(token.to_string()),
        user_id,
    };
    write_auth_json(&get_auth_file(parley_home), &auth_dot_json)
}
