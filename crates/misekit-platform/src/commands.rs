#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::process::Stdio;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Launch settings for helper processes the user never interacts with:
/// stdin is closed so a prompting tool fails instead of hanging, and no
/// console window flashes up on Windows.
pub trait Unattended {
    fn unattended(&mut self) -> &mut Self;
}

macro_rules! unattended_command {
    ($command:ty) => {
        impl Unattended for $command {
            fn unattended(&mut self) -> &mut Self {
                #[cfg(windows)]
                self.creation_flags(CREATE_NO_WINDOW);
                self.stdin(Stdio::null())
            }
        }
    };
}

unattended_command!(std::process::Command);
unattended_command!(tokio::process::Command);
