//! Starter configuration written by `shipyard init`.

/// File name looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "shipyard.toml";

/// A release pipeline for a Composer-managed WordPress site.
pub const TEMPLATE: &str = r#"# Shipyard release pipeline.
#
# Every stage runs inside a fresh workspace directory. `shell` and `exec`
# stages see SHIPYARD_WORKSPACE, SHIPYARD_SOURCE, SHIPYARD_RUN_ID and
# SHIPYARD_STAGE in their environment.

default_env = "production"

[pipeline]
name = "release"
artifact = "build.tar.gz"
# concurrency = 4
# timeout_secs = 1800
workspace_root = ".shipyard/runs"
retention = "on-failure"

[environments.production]
host = "domain.tld"
port = 22
username = "user"
agent = "${SSH_AUTH_SOCK}"
# identity_file = "~/.ssh/id_ed25519"
path = "/srv/http/domain.tld/releases"

[[stages]]
id = "export"
action = "shell"
script = 'git -C "$SHIPYARD_SOURCE" archive --format=tar HEAD | tar xf -'

# Copy files that are not tracked by git. `from` may use wildcards.
#
# [[stages]]
# id = "copy-some-plugin"
# action = "copy"
# from = "web/app/plugins/some-plugin"
# to = "web/app/plugins/"
# depends_on = ["export"]
#
# [[stages]]
# id = "copy-languages"
# action = "copy"
# from = "web/app/languages/*"
# to = "web/app/languages/"
# depends_on = ["export"]

[[stages]]
id = "install"
action = "exec"
program = "composer"
args = ["install", "-o"]
depends_on = ["export"]

# Drop the next three stages if the bundled themes and plugins are not needed.
[[stages]]
id = "bundled-themes"
action = "move-contents"
from = "web/wp/wp-content/themes"
to = "web/app/themes"
depends_on = ["install"]

[[stages]]
id = "bundled-plugins"
action = "move-contents"
from = "web/wp/wp-content/plugins"
to = "web/app/plugins"
depends_on = ["install"]

[[stages]]
id = "remove-hello"
action = "remove"
path = "web/app/plugins/hello.php"
depends_on = ["bundled-plugins"]

[[stages]]
id = "package"
action = "shell"
script = "tar -zcf build.tar.gz *"
depends_on = ["bundled-themes", "remove-hello"]
"#;
