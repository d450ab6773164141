use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use super::{model::App, view};
use crate::engine::{FrameInfo, Renderer};
use crate::spectrum::Spectrum;

/// 终端频谱渲染器
///
/// 创建时进入 raw mode + alternate screen，drop 时恢复
pub struct TuiRenderer {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    app: App,
}

impl TuiRenderer {
    pub fn new(title: String, device: String) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        Ok(Self {
            terminal,
            app: App::new(title, device),
        })
    }

    /// 非阻塞处理所有待处理按键
    fn handle_input(&mut self) -> io::Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => self.app.should_quit = true,
                    // raw mode 下 Ctrl-C 不会产生信号
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        self.app.should_quit = true
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

impl Renderer for TuiRenderer {
    fn render(&mut self, frame: &FrameInfo, spectrum: Option<&Spectrum>) -> io::Result<()> {
        self.handle_input()?;

        let size = self.terminal.size()?;
        self.app.update(frame, spectrum, view::band_count(size.width));
        self.terminal.draw(|f| view::draw(f, &self.app))?;
        Ok(())
    }

    fn should_quit(&self) -> bool {
        self.app.should_quit
    }
}

impl Drop for TuiRenderer {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
