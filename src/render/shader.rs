// src/render/shader.rs

//! GLSL program construction helpers.

use glow::HasContext;

use crate::error::RenderError;

fn compile(
    gl: &glow::Context,
    stage: &'static str,
    kind: u32,
    source: &str,
) -> Result<glow::Shader, RenderError> {
    unsafe {
        let shader = gl.create_shader(kind).map_err(|log| RenderError::ShaderCompile {
            stage,
            log,
        })?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(RenderError::ShaderCompile { stage, log });
        }
        Ok(shader)
    }
}

/// Compiles and links a vertex/fragment shader pair into a program.
pub fn build_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program, RenderError> {
    let vertex = compile(gl, "vertex", glow::VERTEX_SHADER, vertex_src)?;
    let fragment = match compile(gl, "fragment", glow::FRAGMENT_SHADER, fragment_src) {
        Ok(f) => f,
        Err(e) => {
            unsafe { gl.delete_shader(vertex) };
            return Err(e);
        }
    };

    unsafe {
        let program = gl
            .create_program()
            .map_err(|log| RenderError::ProgramLink { log })?;
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.link_program(program);

        // Shaders are no longer needed once linked.
        gl.detach_shader(program, vertex);
        gl.detach_shader(program, fragment);
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(RenderError::ProgramLink { log });
        }
        Ok(program)
    }
}
