//! Remote control keys and their protocol verbs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::command::Command;
use crate::error::OppoError;

/// Generates [`RemoteKey`] with its name and verb lookups from one table.
macro_rules! remote_keys {
    ($($key:ident => $name:literal, $verb:literal;)+) => {
        /// A button on the player's IR remote.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum RemoteKey {
            $($key,)+
        }

        impl RemoteKey {
            /// Every key, in remote layout order.
            pub const ALL: &'static [RemoteKey] = &[$(RemoteKey::$key,)+];

            /// Three-letter protocol verb sent for this key.
            pub fn verb(self) -> &'static str {
                match self {
                    $(RemoteKey::$key => $verb,)+
                }
            }

            /// Display name, also accepted by [`FromStr`].
            pub fn name(self) -> &'static str {
                match self {
                    $(RemoteKey::$key => $name,)+
                }
            }
        }
    };
}

remote_keys! {
    UpArrow => "UpArrow", "NUP";
    DownArrow => "DownArrow", "NDN";
    LeftArrow => "LeftArrow", "NLT";
    RightArrow => "RightArrow", "NRT";
    Enter => "Enter", "SEL";
    PageUp => "PageUp", "PUP";
    PageDown => "PageDown", "PDN";
    Return => "Return", "RET";
    Home => "Home", "HOM";
    Stop => "Stop", "STP";
    Power => "Power", "POW";
    Open => "Open", "EJT";
    On => "On", "PON";
    Off => "Off", "POF";
    Dimmer => "Dimmer", "DIM";
    PureAudio => "PureAudio", "PUR";
    VolumeUp => "VolumeUp", "VUP";
    VolumeDown => "VolumeDown", "VDN";
    Mute => "Mute", "MUT";
    Num1 => "Num1", "NU1";
    Num2 => "Num2", "NU2";
    Num3 => "Num3", "NU3";
    Num4 => "Num4", "NU4";
    Num5 => "Num5", "NU5";
    Num6 => "Num6", "NU6";
    Num7 => "Num7", "NU7";
    Num8 => "Num8", "NU8";
    Num9 => "Num9", "NU9";
    Num0 => "Num0", "NU0";
    Clear => "Clear", "CLR";
    Goto => "Goto", "GOT";
    Info => "Info", "OSD";
    TopMenu => "TopMenu", "TTL";
    PopUpMenu => "PopUpMenu", "MNU";
    Setup => "Setup", "SET";
    Red => "Red", "RED";
    Green => "Green", "GRN";
    Blue => "Blue", "BLU";
    Yellow => "Yellow", "YLW";
    Play => "Play", "PLA";
    Pause => "Pause", "PAU";
    SkipPrevious => "SkipPrevious", "PRE";
    Reverse => "Reverse", "REV";
    Forward => "Forward", "FWD";
    SkipNext => "SkipNext", "NXT";
    Audio => "Audio", "AUD";
    Subtitle => "Subtitle", "SUB";
    Angle => "Angle", "ANG";
    Zoom => "Zoom", "ZOM";
    SecondaryAudio => "SAP", "SAP";
    AbReplay => "ABReplay", "ATB";
    Repeat => "Repeat", "RPT";
    PictureInPicture => "PIP", "PIP";
    Resolution => "Resolution", "HDM";
    SubtitleHold => "SubtitleHold", "SUH";
    Option => "Option", "OPT";
    ThreeD => "3D", "M3D";
    PictureAdjust => "Pic", "SEH";
    Hdr => "HDR", "HDR";
    InfoHold => "InfoHold", "INH";
    ResolutionHold => "ResolutionHold", "RLH";
    AvSync => "ShowAVSync", "AVS";
    GaplessPlayback => "GaplessPlayback", "GPA";
    Input => "Input", "SRC";
}

impl RemoteKey {
    /// The protocol command for pressing this key.
    pub fn command(self) -> Command {
        Command::from_static(self.verb())
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses a key by display name or variant name, ignoring case.
///
/// `Vol+`-style aliases are not supported; use `VolumeUp`.
impl FromStr for RemoteKey {
    type Err = OppoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RemoteKey::ALL
            .iter()
            .copied()
            .find(|key| {
                key.name().eq_ignore_ascii_case(wanted)
                    || format!("{:?}", key).eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| OppoError::InvalidCommand(format!("unknown remote key {:?}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_is_complete_and_unique() {
        assert_eq!(RemoteKey::ALL.len(), 64);
        let verbs: HashSet<_> = RemoteKey::ALL.iter().map(|k| k.verb()).collect();
        assert_eq!(verbs.len(), 64);
        for key in RemoteKey::ALL {
            assert_eq!(key.command().verb(), key.verb());
        }
    }

    #[test]
    fn well_known_verbs() {
        assert_eq!(RemoteKey::Play.verb(), "PLA");
        assert_eq!(RemoteKey::Enter.verb(), "SEL");
        assert_eq!(RemoteKey::Info.verb(), "OSD");
        assert_eq!(RemoteKey::ThreeD.verb(), "M3D");
        assert_eq!(RemoteKey::Input.verb(), "SRC");
        assert_eq!(RemoteKey::Resolution.verb(), "HDM");
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("play".parse::<RemoteKey>().unwrap(), RemoteKey::Play);
        assert_eq!("TopMenu".parse::<RemoteKey>().unwrap(), RemoteKey::TopMenu);
        assert_eq!("3d".parse::<RemoteKey>().unwrap(), RemoteKey::ThreeD);
        assert_eq!("threed".parse::<RemoteKey>().unwrap(), RemoteKey::ThreeD);
        assert_eq!("abreplay".parse::<RemoteKey>().unwrap(), RemoteKey::AbReplay);
        assert!("Rewind".parse::<RemoteKey>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for key in RemoteKey::ALL {
            assert_eq!(key.to_string().parse::<RemoteKey>().unwrap(), *key);
        }
    }
}
