// src/render/mod.rs

//! GL ES 2 video render pipeline.
//!
//! Uploads I420 planes into three LUMINANCE textures and draws a full-screen
//! quad through a YUV-to-RGB shader (BT.601). Two render paths exist, fixed
//! at construction: `Direct` draws straight onto the window surface,
//! `Offscreen` composes into an FBO-backed texture first and blits it to the
//! surface with a second pass, which lets overlays share the composite
//! target.
//!
//! GL object handles are plain values; the objects themselves die with the
//! EGL context, so there is no teardown here.

pub mod shader;

use glow::HasContext;

use crate::config::RenderPathConfig;
use crate::error::RenderError;
use crate::source::DecodedFrame;

const VIDEO_VS: &str = r#"
attribute vec2 aPos;
attribute vec2 aTexCoord;
varying vec2 vTexCoord;
void main() {
    gl_Position = vec4(aPos, 0.0, 1.0);
    vTexCoord = aTexCoord;
}
"#;

const VIDEO_FS: &str = r#"
precision mediump float;
varying vec2 vTexCoord;
uniform sampler2D texY;
uniform sampler2D texU;
uniform sampler2D texV;
void main() {
    float y = texture2D(texY, vTexCoord).r;
    float u = texture2D(texU, vTexCoord).r - 0.5;
    float v = texture2D(texV, vTexCoord).r - 0.5;
    float r = y + 1.402 * v;
    float g = y - 0.344 * u - 0.714 * v;
    float b = y + 1.772 * u;
    gl_FragColor = vec4(r, g, b, 1.0);
}
"#;

const COMPOSITE_FS: &str = r#"
precision mediump float;
varying vec2 vTexCoord;
uniform sampler2D texComposite;
void main() {
    gl_FragColor = texture2D(texComposite, vTexCoord);
}
"#;

/// Which surface the video pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    Direct,
    Offscreen,
}

impl From<RenderPathConfig> for RenderPath {
    fn from(config: RenderPathConfig) -> Self {
        match config {
            RenderPathConfig::Direct => RenderPath::Direct,
            RenderPathConfig::Offscreen => RenderPath::Offscreen,
        }
    }
}

struct VideoPass {
    program: glow::Program,
    vbo: glow::Buffer,
    attr_pos: u32,
    attr_tex: u32,
    tex_y: glow::Texture,
    tex_u: glow::Texture,
    tex_v: glow::Texture,
}

struct OffscreenTarget {
    fbo: glow::Framebuffer,
    texture: glow::Texture,
    program: glow::Program,
    attr_pos: u32,
    attr_tex: u32,
}

pub struct Renderer {
    width: u32,
    height: u32,
    path: RenderPath,
    video: VideoPass,
    offscreen: Option<OffscreenTarget>,
}

/// Interleaved aPos/aTexCoord quad, triangle strip, texture V flipped so
/// top-of-video lands at top-of-screen.
const QUAD: [f32; 16] = [
    -1.0, -1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, //
    1.0, 1.0, 1.0, 0.0,
];

fn quad_bytes() -> Vec<u8> {
    QUAD.iter().flat_map(|f| f.to_ne_bytes()).collect()
}

/// The framebuffer screenshots read from: the composite FBO when one
/// exists, the window surface otherwise.
fn capture_target(offscreen: Option<&OffscreenTarget>) -> Option<glow::Framebuffer> {
    offscreen.map(|o| o.fbo)
}

fn plane_texture(gl: &glow::Context) -> Result<glow::Texture, RenderError> {
    unsafe {
        let tex = gl.create_texture().map_err(|log| RenderError::ShaderCompile {
            stage: "texture",
            log,
        })?;
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
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
        Ok(tex)
    }
}

fn upload_plane(gl: &glow::Context, tex: glow::Texture, width: u32, height: u32, data: &[u8]) {
    unsafe {
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        // Plane rows are tightly packed.
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::LUMINANCE as i32,
            width as i32,
            height as i32,
            0,
            glow::LUMINANCE,
            glow::UNSIGNED_BYTE,
            Some(data),
        );
    }
}

impl Renderer {
    /// Builds the programs, textures and (for `Offscreen`) the FBO target.
    /// `width`/`height` are the display dimensions.
    pub fn new(
        gl: &glow::Context,
        width: u32,
        height: u32,
        path: RenderPath,
    ) -> Result<Self, RenderError> {
        let program = shader::build_program(gl, VIDEO_VS, VIDEO_FS)?;

        let (vbo, attr_pos, attr_tex) = unsafe {
            let vbo = gl.create_buffer().map_err(|log| RenderError::ProgramLink { log })?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &quad_bytes(), glow::STATIC_DRAW);

            let attr_pos = gl.get_attrib_location(program, "aPos").ok_or_else(|| {
                RenderError::ProgramLink {
                    log: "aPos attribute missing".into(),
                }
            })?;
            let attr_tex = gl.get_attrib_location(program, "aTexCoord").ok_or_else(|| {
                RenderError::ProgramLink {
                    log: "aTexCoord attribute missing".into(),
                }
            })?;
            (vbo, attr_pos, attr_tex)
        };

        unsafe {
            gl.use_program(Some(program));
            for (name, unit) in [("texY", 0), ("texU", 1), ("texV", 2)] {
                let loc = gl.get_uniform_location(program, name);
                gl.uniform_1_i32(loc.as_ref(), unit);
            }
        }

        let video = VideoPass {
            program,
            vbo,
            attr_pos,
            attr_tex,
            tex_y: plane_texture(gl)?,
            tex_u: plane_texture(gl)?,
            tex_v: plane_texture(gl)?,
        };

        let offscreen = match path {
            RenderPath::Direct => None,
            RenderPath::Offscreen => Some(Self::build_offscreen(gl, width, height)?),
        };

        Ok(Renderer {
            width,
            height,
            path,
            video,
            offscreen,
        })
    }

    fn build_offscreen(
        gl: &glow::Context,
        width: u32,
        height: u32,
    ) -> Result<OffscreenTarget, RenderError> {
        let program = shader::build_program(gl, VIDEO_VS, COMPOSITE_FS)?;
        unsafe {
            let texture = gl.create_texture().map_err(|log| RenderError::ProgramLink { log })?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
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

            let fbo = gl
                .create_framebuffer()
                .map_err(|log| RenderError::ProgramLink { log })?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                return Err(RenderError::ProgramLink {
                    log: format!("offscreen framebuffer incomplete: 0x{:x}", status),
                });
            }

            let attr_pos = gl.get_attrib_location(program, "aPos").ok_or_else(|| {
                RenderError::ProgramLink {
                    log: "aPos attribute missing".into(),
                }
            })?;
            let attr_tex = gl.get_attrib_location(program, "aTexCoord").ok_or_else(|| {
                RenderError::ProgramLink {
                    log: "aTexCoord attribute missing".into(),
                }
            })?;
            let loc = gl.get_uniform_location(program, "texComposite");
            gl.use_program(Some(program));
            gl.uniform_1_i32(loc.as_ref(), 0);

            Ok(OffscreenTarget {
                fbo,
                texture,
                program,
                attr_pos,
                attr_tex,
            })
        }
    }

    pub fn path(&self) -> RenderPath {
        self.path
    }

    /// Binds the frame's render target and clears it.
    pub fn begin_frame(&self, gl: &glow::Context) {
        unsafe {
            let fbo = self.offscreen.as_ref().map(|o| o.fbo);
            gl.bind_framebuffer(glow::FRAMEBUFFER, fbo);
            gl.viewport(0, 0, self.width as i32, self.height as i32);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    /// Uploads the frame's planes and draws the video quad.
    pub fn draw_video(&self, gl: &glow::Context, frame: &DecodedFrame) {
        let (w, h) = (frame.width(), frame.height());
        unsafe {
            gl.active_texture(glow::TEXTURE0);
            upload_plane(gl, self.video.tex_y, w, h, frame.y_plane());
            gl.active_texture(glow::TEXTURE1);
            upload_plane(gl, self.video.tex_u, w / 2, h / 2, frame.u_plane());
            gl.active_texture(glow::TEXTURE2);
            upload_plane(gl, self.video.tex_v, w / 2, h / 2, frame.v_plane());

            gl.use_program(Some(self.video.program));
            self.draw_quad(gl, self.video.vbo, self.video.attr_pos, self.video.attr_tex);
        }
    }

    /// For `Offscreen`, blits the composite texture to the window surface.
    /// No-op for `Direct`.
    pub fn finish_frame(&self, gl: &glow::Context) {
        let target = match self.offscreen.as_ref() {
            Some(t) => t,
            None => return,
        };
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.viewport(0, 0, self.width as i32, self.height as i32);
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(target.texture));
            gl.use_program(Some(target.program));
            self.draw_quad(gl, self.video.vbo, target.attr_pos, target.attr_tex);
        }
    }

    /// Reads back the composed frame. Rows arrive bottom first.
    ///
    /// The Offscreen path reads the FBO, which still holds the frame after
    /// the window surface's buffers have been exchanged. The Direct path
    /// has only the window surface; its back buffer keeps the frame across
    /// the exchange because the EGL surface is set to preserved swaps.
    pub fn read_composed_pixels(&self, gl: &glow::Context) -> Vec<u8> {
        let mut pixels = vec![0u8; (self.width * self.height * 4) as usize];
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, capture_target(self.offscreen.as_ref()));
            gl.read_pixels(
                0,
                0,
                self.width as i32,
                self.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(&mut pixels),
            );
        }
        pixels
    }

    unsafe fn draw_quad(&self, gl: &glow::Context, vbo: glow::Buffer, attr_pos: u32, attr_tex: u32) {
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.enable_vertex_attrib_array(attr_pos);
        gl.vertex_attrib_pointer_f32(attr_pos, 2, glow::FLOAT, false, 16, 0);
        gl.enable_vertex_attrib_array(attr_tex);
        gl.vertex_attrib_pointer_f32(attr_tex, 2, glow::FLOAT, false, 16, 8);
        gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
        gl.disable_vertex_attrib_array(attr_pos);
        gl.disable_vertex_attrib_array(attr_tex);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
