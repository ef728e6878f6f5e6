//! Writes `bin/activate`, the shell snippet a user sources to put this
//! environment's shims ahead of `PATH` and set `WHARFRAT_ENV`.

use anyhow::{Context as _, Result};
use camino::Utf8Path;

const TEMPLATE: &str = r#"
wr-deactivate() {
    if ! [ -z "${_OLD_WRENV_PATH+_}" ]; then
        PATH="$_OLD_WRENV_PATH"
        export PATH
        unset _OLD_WRENV_PATH
    fi

    if [ -n "${BASH_VERSION-}" ]; then
        hash -r
    fi

    if ! [ -z "${_OLD_WRENV_PS1+_}" ]; then
        PS1="$_OLD_WRENV_PS1"
        export PS1
        unset _OLD_WRENV_PS1
    fi

    unset WHARFRAT_ENV

    if [ "$1" != "nosuicide" ]; then
        unset -f wr-deactivate
    fi
}

# cleanup
wr-deactivate nosuicide

WHARFRAT_ENV="{{PATH}}"
export WHARFRAT_ENV

_OLD_WRENV_PATH="$PATH"
PATH="$WHARFRAT_ENV/bin:$PATH"
export PATH

if [ -z "${WHARFRAT_ENV_DISABLE_PROMPT-}" ]; then
	_OLD_WRENV_PS1="$PS1"
	PS1="(wr:$(basename "$WHARFRAT_ENV")) $PS1"
	export PS1
fi

if [ -n "${BASH_VERSION-}" ]; then
    hash -r
fi

if [ -z "${WHARFRAT_ENV_QUIET-}" ]; then
    echo "Activated wharfrat environment, 'wr-deactivate' to deactivate."
fi
"#;

pub fn write(path: &Utf8Path) -> Result<()> {
    let script = TEMPLATE.replace("{{PATH}}", path.as_str());
    let filename = path.join("bin").join("activate");
    std::fs::write(&filename, script).with_context(|| format!("writing {filename}"))
}
