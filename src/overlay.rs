// src/overlay.rs

//! Scrolling text overlay (ticker).
//!
//! Rasterizes each glyph of the configured text once through FreeType into
//! an ALPHA texture, cached per character, then draws the line scrolling
//! right-to-left along the bottom of the screen. Glyph quads are positioned
//! in pixel space; the vertex shader maps to clip space with Y flipped so
//! the origin is the top-left corner. An outline is added in the fragment
//! shader by sampling neighboring texels.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Context as _;
use glow::HasContext;
use log::debug;

use crate::config::OverlayConfig;
use crate::render::shader;

/// Texture padding so the shader's outline samples stay inside the glyph.
const GLYPH_PADDING: u32 = 2;

const TICKER_VS: &str = r#"
attribute vec2 aPos;
attribute vec2 aTexCoord;
varying vec2 vTexCoord;
uniform vec2 uResolution;
void main() {
    vec2 clip = (aPos / uResolution) * 2.0 - 1.0;
    gl_Position = vec4(clip.x, -clip.y, 0.0, 1.0);
    vTexCoord = aTexCoord;
}
"#;

const TICKER_FS: &str = r#"
precision mediump float;
varying vec2 vTexCoord;
uniform sampler2D uGlyph;
uniform vec4 uColor;
uniform vec4 uOutlineColor;
uniform float uOutlineWidth;
uniform vec2 uTextureSize;
void main() {
    float alpha = texture2D(uGlyph, vTexCoord).a;
    vec2 step = uOutlineWidth / uTextureSize;
    float outline = alpha;
    outline = max(outline, texture2D(uGlyph, vTexCoord + vec2(step.x, 0.0)).a);
    outline = max(outline, texture2D(uGlyph, vTexCoord - vec2(step.x, 0.0)).a);
    outline = max(outline, texture2D(uGlyph, vTexCoord + vec2(0.0, step.y)).a);
    outline = max(outline, texture2D(uGlyph, vTexCoord - vec2(0.0, step.y)).a);
    vec4 color = mix(uOutlineColor, uColor, alpha);
    gl_FragColor = vec4(color.rgb, outline);
}
"#;

struct Glyph {
    texture: glow::Texture,
    width: u32,
    height: u32,
    bearing_x: f32,
    bearing_y: f32,
    /// Horizontal pen advance in pixels.
    advance: f32,
}

pub struct Overlay {
    program: glow::Program,
    vbo: glow::Buffer,
    attr_pos: u32,
    attr_tex: u32,
    glyphs: HashMap<char, Glyph>,
    text: Vec<char>,
    total_width: f32,
    screen_w: f32,
    screen_h: f32,
    pixel_size: u32,
    scroll_speed: f32,
    start: Instant,
}

impl Overlay {
    pub fn new(
        gl: &glow::Context,
        config: &OverlayConfig,
        screen_w: u32,
        screen_h: u32,
    ) -> anyhow::Result<Self> {
        let library = freetype::Library::init().context("FreeType init failed")?;
        let face = library
            .new_face(&config.font_path, 0)
            .with_context(|| format!("failed to load font {:?}", config.font_path))?;
        face.set_pixel_sizes(0, config.pixel_size)
            .context("failed to set glyph pixel size")?;

        let program = shader::build_program(gl, TICKER_VS, TICKER_FS)
            .map_err(|e| anyhow::anyhow!("ticker shader: {}", e))?;
        let vbo = unsafe {
            gl.create_buffer()
                .map_err(|log| anyhow::anyhow!("ticker vbo: {}", log))?
        };
        let (attr_pos, attr_tex) = unsafe {
            let pos = gl
                .get_attrib_location(program, "aPos")
                .ok_or_else(|| anyhow::anyhow!("aPos missing from ticker program"))?;
            let tex = gl
                .get_attrib_location(program, "aTexCoord")
                .ok_or_else(|| anyhow::anyhow!("aTexCoord missing from ticker program"))?;
            (pos, tex)
        };

        let text: Vec<char> = config.text.chars().collect();
        let mut glyphs = HashMap::new();
        let mut total_width = 0.0f32;
        for &ch in &text {
            if !glyphs.contains_key(&ch) {
                let glyph = rasterize_glyph(gl, &face, ch)
                    .with_context(|| format!("failed to rasterize {:?}", ch))?;
                glyphs.insert(ch, glyph);
            }
            total_width += glyphs[&ch].advance;
        }
        debug!(
            "Ticker prepared: {} glyphs cached, line {}px wide",
            glyphs.len(),
            total_width
        );

        Ok(Overlay {
            program,
            vbo,
            attr_pos,
            attr_tex,
            glyphs,
            text,
            total_width,
            screen_w: screen_w as f32,
            screen_h: screen_h as f32,
            pixel_size: config.pixel_size,
            scroll_speed: config.scroll_speed,
            start: Instant::now(),
        })
    }

    /// Draws the ticker at its current scroll position. Call after the video
    /// pass, into the same render target.
    pub fn draw(&self, gl: &glow::Context) {
        let elapsed = self.start.elapsed().as_secs_f32();
        let mut pen_x = scroll_position(
            elapsed,
            self.scroll_speed,
            self.screen_w,
            self.total_width,
        );
        let baseline = self.screen_h - (self.pixel_size as f32) * 0.5;

        unsafe {
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.use_program(Some(self.program));

            let resolution = gl.get_uniform_location(self.program, "uResolution");
            gl.uniform_2_f32(resolution.as_ref(), self.screen_w, self.screen_h);
            let color = gl.get_uniform_location(self.program, "uColor");
            gl.uniform_4_f32(color.as_ref(), 1.0, 1.0, 1.0, 1.0);
            let outline_color = gl.get_uniform_location(self.program, "uOutlineColor");
            gl.uniform_4_f32(outline_color.as_ref(), 0.0, 0.0, 0.0, 1.0);
            let outline_width = gl.get_uniform_location(self.program, "uOutlineWidth");
            gl.uniform_1_f32(outline_width.as_ref(), GLYPH_PADDING as f32);
            let sampler = gl.get_uniform_location(self.program, "uGlyph");
            gl.uniform_1_i32(sampler.as_ref(), 0);
            gl.active_texture(glow::TEXTURE0);

            for &ch in &self.text {
                let glyph = match self.glyphs.get(&ch) {
                    Some(g) => g,
                    None => continue,
                };
                if glyph.width > 0 && glyph.height > 0 {
                    self.draw_glyph(gl, glyph, pen_x, baseline);
                }
                pen_x += glyph.advance;
            }

            gl.disable(glow::BLEND);
        }
    }

    unsafe fn draw_glyph(&self, gl: &glow::Context, glyph: &Glyph, pen_x: f32, baseline: f32) {
        let x0 = pen_x + glyph.bearing_x;
        let y0 = baseline - glyph.bearing_y;
        let x1 = x0 + glyph.width as f32;
        let y1 = y0 + glyph.height as f32;

        // Two triangles per glyph, rebuilt each frame.
        let vertices: [f32; 24] = [
            x0, y0, 0.0, 0.0, //
            x1, y0, 1.0, 0.0, //
            x1, y1, 1.0, 1.0, //
            x0, y0, 0.0, 0.0, //
            x1, y1, 1.0, 1.0, //
            x0, y1, 0.0, 1.0,
        ];
        let bytes: Vec<u8> = vertices.iter().flat_map(|f| f.to_ne_bytes()).collect();

        let tex_size = gl.get_uniform_location(self.program, "uTextureSize");
        gl.uniform_2_f32(tex_size.as_ref(), glyph.width as f32, glyph.height as f32);

        gl.bind_texture(glow::TEXTURE_2D, Some(glyph.texture));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::DYNAMIC_DRAW);
        gl.enable_vertex_attrib_array(self.attr_pos);
        gl.vertex_attrib_pointer_f32(self.attr_pos, 2, glow::FLOAT, false, 16, 0);
        gl.enable_vertex_attrib_array(self.attr_tex);
        gl.vertex_attrib_pointer_f32(self.attr_tex, 2, glow::FLOAT, false, 16, 8);
        gl.draw_arrays(glow::TRIANGLES, 0, 6);
        gl.disable_vertex_attrib_array(self.attr_pos);
        gl.disable_vertex_attrib_array(self.attr_tex);
    }
}

/// Current left edge of the ticker line. Starts at the right screen edge
/// and wraps once the whole line has scrolled off the left.
fn scroll_position(elapsed_s: f32, speed: f32, screen_w: f32, total_width: f32) -> f32 {
    let travel = screen_w + total_width;
    if travel <= 0.0 {
        return screen_w;
    }
    screen_w - (elapsed_s * speed) % travel
}

/// Renders one character into a padded ALPHA texture.
fn rasterize_glyph(
    gl: &glow::Context,
    face: &freetype::Face,
    ch: char,
) -> anyhow::Result<Glyph> {
    face.load_char(ch as usize, freetype::face::LoadFlag::RENDER)
        .with_context(|| format!("load_char {:?}", ch))?;
    let slot = face.glyph();
    let bitmap = slot.bitmap();

    let src_w = bitmap.width() as u32;
    let src_h = bitmap.rows() as u32;
    let pitch = bitmap.pitch();
    let buffer = bitmap.buffer();

    // Pad on every side so outline sampling never clamps into the ink.
    let padded_w = src_w + 2 * GLYPH_PADDING;
    let padded_h = src_h + 2 * GLYPH_PADDING;
    let mut padded = vec![0u8; (padded_w * padded_h) as usize];
    for row in 0..src_h {
        let src_start = (row as i32 * pitch) as usize;
        let dst_start = ((row + GLYPH_PADDING) * padded_w + GLYPH_PADDING) as usize;
        padded[dst_start..dst_start + src_w as usize]
            .copy_from_slice(&buffer[src_start..src_start + src_w as usize]);
    }

    let texture = unsafe {
        let tex = gl
            .create_texture()
            .map_err(|log| anyhow::anyhow!("glyph texture: {}", log))?;
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::ALPHA as i32,
            padded_w as i32,
            padded_h as i32,
            0,
            glow::ALPHA,
            glow::UNSIGNED_BYTE,
            Some(&padded),
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MIN_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MAG_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_S,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_T,
            glow::CLAMP_TO_EDGE as i32,
        );
        tex
    };

    Ok(Glyph {
        texture,
        width: padded_w,
        height: padded_h,
        bearing_x: slot.bitmap_left() as f32 - GLYPH_PADDING as f32,
        bearing_y: slot.bitmap_top() as f32 + GLYPH_PADDING as f32,
        // FreeType advances are in 1/64 pixel.
        advance: (slot.advance().x as f32) / 64.0,
    })
}
