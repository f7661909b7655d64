//! Rendering of the Ansible inventory and Shadowsocks playbook.

use std::net::IpAddr;

use serde::Serialize;
use shell_escape::unix::escape;

use super::ProxySettings;

/// Inventory group the playbook targets.
pub const INVENTORY_GROUP: &str = "proxy_server";

/// Remote path of the Shadowsocks configuration file.
pub const SHADOWSOCKS_CONFIG_PATH: &str = "/etc/shadowsocks-libev/config.json";

#[derive(Serialize)]
struct ShadowsocksConfig<'a> {
    server: &'a str,
    server_port: u16,
    password: &'a str,
    timeout: u64,
    method: &'a str,
    fast_open: bool,
}

/// Renders a single-host inventory for `address`.
#[must_use]
pub fn render_inventory(address: IpAddr, ssh_user: &str, identity_file: Option<&str>) -> String {
    let mut host = format!("{address} ansible_user={}", escape(ssh_user.into()));
    if let Some(key) = identity_file {
        host.push_str(" ansible_ssh_private_key_file=");
        host.push_str(&escape(key.into()));
    }
    format!("[{INVENTORY_GROUP}]\n{host}\n")
}

/// Renders the Shadowsocks daemon configuration as pretty JSON.
///
/// # Errors
///
/// Returns the serialisation error; in practice the fixed shape always encodes.
pub fn render_server_config(settings: &ProxySettings) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ShadowsocksConfig {
        server: "0.0.0.0",
        server_port: settings.port,
        password: &settings.password,
        timeout: settings.timeout_secs,
        method: &settings.method,
        fast_open: true,
    })
}

/// Renders the playbook that installs, configures, and firewalls the proxy.
///
/// The daemon configuration is tagged `!unsafe` so Ansible never templates
/// the password.
///
/// # Errors
///
/// Propagates failures from [`render_server_config`].
pub fn render_playbook(settings: &ProxySettings) -> Result<String, serde_json::Error> {
    let config = render_server_config(settings)?;
    let content = config
        .lines()
        .map(|line| format!("          {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    let port = settings.port;

    Ok(format!(
        r"- name: Deploy Shadowsocks proxy server
  hosts: {INVENTORY_GROUP}
  become: yes
  tasks:
    - name: Update apt cache
      apt:
        update_cache: yes
    - name: Install shadowsocks-libev
      apt:
        name: shadowsocks-libev
        state: present
    - name: Create Shadowsocks config directory
      file:
        path: /etc/shadowsocks-libev
        state: directory
        mode: '0755'
    - name: Configure Shadowsocks
      copy:
        content: !unsafe |
{content}
        dest: {SHADOWSOCKS_CONFIG_PATH}
        mode: '0600'
      notify: Restart Shadowsocks
    - name: Ensure Shadowsocks service is enabled and started
      systemd:
        name: shadowsocks-libev
        enabled: yes
        state: started
    - name: Install UFW
      apt:
        name: ufw
        state: present
    - name: Allow SSH
      ufw:
        rule: allow
        port: '22'
    - name: Allow Shadowsocks port
      ufw:
        rule: allow
        port: '{port}'
    - name: Enable UFW
      ufw:
        state: enabled
  handlers:
    - name: Restart Shadowsocks
      systemd:
        name: shadowsocks-libev
        state: restarted
"
    ))
}
