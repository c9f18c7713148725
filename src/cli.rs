use crate::config::{AppConfigOverrides, DEFAULT_CONFIG_PATH};
use clap::Parser;
use std::path::PathBuf;

/// Plays back baked vertex animation textures.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "vat_player", version)]
pub struct CliArgs {
    /// Configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// glTF mesh carrying baked vertex coordinates in TEXCOORD_1.
    #[arg(long)]
    pub mesh: Option<PathBuf>,

    /// Position texture (PNG for packed data, EXR/HDR for unpacked data).
    #[arg(long)]
    pub position_texture: Option<PathBuf>,

    /// Optional normal texture.
    #[arg(long)]
    pub normal_texture: Option<PathBuf>,

    /// Calibration metadata (JSON or material dump).
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Instance count; anything above 1 enables instancing.
    #[arg(long)]
    pub instances: Option<u32>,

    /// Grid spacing between instances.
    #[arg(long, allow_negative_numbers = true)]
    pub spacing: Option<f32>,

    /// Playback speed multiplier.
    #[arg(long)]
    pub speed: Option<f32>,

    /// Flip the V coordinate (on/off).
    #[arg(long, value_parser = parse_bool_flag)]
    pub flip_v: Option<bool>,

    /// Add decoded values to the rest pose (on/off).
    #[arg(long, value_parser = parse_bool_flag)]
    pub offset: Option<bool>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Vertical sync (on/off).
    #[arg(long, value_parser = parse_bool_flag)]
    pub vsync: Option<bool>,
}

impl CliArgs {
    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            width: self.width,
            height: self.height,
            vsync: self.vsync,
            mesh: self.mesh,
            position_texture: self.position_texture,
            normal_texture: self.normal_texture,
            metadata: self.metadata,
            instances: self.instances,
            spacing: self.spacing,
            speed: self.speed,
            flip_v: self.flip_v,
            use_offset: self.offset,
        }
    }
}

fn parse_bool_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(format!("invalid value '{other}'; use on/off or true/false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_overrides() {
        let args =
            CliArgs::try_parse_from(["vat_player", "--width", "1600", "--height", "900", "--vsync", "off"])
                .expect("parse args");
        let overrides = args.into_config_overrides();
        assert_eq!(
            (overrides.width, overrides.height, overrides.vsync),
            (Some(1600), Some(900), Some(false))
        );
    }

    #[test]
    fn parses_asset_and_playback_flags() {
        let args = CliArgs::try_parse_from([
            "vat_player",
            "--mesh",
            "crowd.glb",
            "--position-texture",
            "crowd_pos.exr",
            "--metadata",
            "crowd.json",
            "--instances",
            "400",
            "--spacing",
            "2.5",
            "--flip-v",
            "on",
            "--offset",
            "true",
        ])
        .expect("parse args");
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        let overrides = args.into_config_overrides();
        assert_eq!(overrides.position_texture, Some(PathBuf::from("crowd_pos.exr")));
        assert_eq!(overrides.instances, Some(400));
        assert_eq!(overrides.spacing, Some(2.5));
        assert_eq!(overrides.flip_v, Some(true));
        assert_eq!(overrides.use_offset, Some(true));
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let args = CliArgs::try_parse_from(["vat_player"]).expect("parse args");
        assert!(args.into_config_overrides().is_empty());
    }

    #[test]
    fn rejects_bad_bool_and_unknown_flags() {
        assert!(CliArgs::try_parse_from(["vat_player", "--vsync", "maybe"]).is_err());
        assert!(CliArgs::try_parse_from(["vat_player", "--foo", "bar"]).is_err());
    }
}
