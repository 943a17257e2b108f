use crate::config::{load_param_table, load_settings, save_settings_atomic, Paths, Settings};
use crate::input::{collect_input, map_event_to_action, AppAction, KEY_HELP};
use crate::render::{
    canvas_to_cells, draw_frame, draw_param_panel, draw_status, draw_text, Cell, Pixel, Terminal,
    Viewport,
};
use crate::Args;
use anyhow::Context;
use crossterm::style::Color;
use simview::bridge::SimulationBridge;
use simview::engine::PreviewEngine;
use simview::params::ParameterSet;
use simview::spectrum::SaseGenerator;
use simview::symmetry::{BuiltinLysozyme, PdbFile, StructureSource};
use simview::{ControlError, ControlEvent, Controller, ControllerOptions, Outcome};
use std::cmp::{max, min};
use std::time::Duration;

const STATUS_ROWS: i32 = 6;

pub(crate) struct App {
    settings: Settings,
    paths: Paths,
    ctl: Controller,
    source: String,
    term: Terminal,
    show_help: bool,
    message: Option<String>,
    should_quit: bool,
}

impl App {
    fn init(args: Args, paths: Paths) -> anyhow::Result<Self> {
        let mut settings = load_settings(&paths.settings_path);
        if let Some(seed) = args.seed {
            settings.seed = seed;
        }
        if args.mono {
            settings.enable_color = false;
        }
        if let Some(w) = args.width {
            settings.detector_width = w;
        }
        if let Some(h) = args.height {
            settings.detector_height = h;
        }
        settings.detector_width = settings.detector_width.clamp(16, 2048);
        settings.detector_height = settings.detector_height.clamp(16, 2048);

        let table = match &args.params {
            Some(p) => load_param_table(p, true)?,
            None => load_param_table(&paths.params_path, false)?,
        };

        let source: Box<dyn StructureSource> = match args.structure {
            Some(path) => Box::new(PdbFile { path }),
            None => Box::new(BuiltinLysozyme),
        };
        let structure = source
            .load()
            .with_context(|| format!("could not load structure from {}", source.describe()))?;
        log::info!(
            "structure {}: {} ({:?}), cell {:.2} {:.2} {:.2}",
            source.describe(),
            structure.space_group,
            structure.system,
            structure.cell.a,
            structure.cell.b,
            structure.cell.c
        );

        let params = ParameterSet::initialize(&structure, &table);
        let energy = params.value("Energy").unwrap_or(9500.0);
        let bridge = SimulationBridge::new(
            Box::new(PreviewEngine::new(
                settings.detector_width,
                settings.detector_height,
            )),
            Box::new(SaseGenerator::new(settings.seed.wrapping_add(1), energy)),
        );
        let options = ControllerOptions {
            spectrum: settings.spectrum,
            display: settings.display_mode,
            palette: settings.palette,
            diffuse: args.diffuse,
            seed: settings.seed,
        };
        let ctl = Controller::new(params, bridge, options).context("initial simulation failed")?;

        // Raw mode only after everything that can fail at startup.
        let term = Terminal::begin()?;

        Ok(Self {
            settings,
            paths,
            ctl,
            source: source.describe(),
            term,
            show_help: false,
            message: None,
            should_quit: false,
        })
    }

    fn run(&mut self) -> anyhow::Result<()> {
        let result = self.event_loop();
        self.term.end()?;
        result?;

        self.settings.display_mode = self.ctl.images().mode;
        self.settings.palette = self.ctl.images().palette;
        self.settings.spectrum = self.ctl.spectrum();
        save_settings_atomic(&self.paths.settings_path, &self.settings)?;
        log::info!("session ended after {} engine calls", self.ctl.engine_calls());
        Ok(())
    }

    fn event_loop(&mut self) -> anyhow::Result<()> {
        self.render_frame()?;
        while !self.should_quit {
            let (events, resized) = collect_input(Duration::from_millis(250))?;
            let resized = self.term.resize_if_needed()? || resized;
            let dirty = !events.is_empty() || resized;

            for ev in events {
                match map_event_to_action(self.show_help, ev) {
                    Some(AppAction::Quit) => {
                        self.should_quit = true;
                        break;
                    }
                    Some(AppAction::HelpToggle) => self.show_help = !self.show_help,
                    Some(AppAction::Control(event)) => self.dispatch(&event),
                    Some(AppAction::Jump(row)) => {
                        if let Some(name) = self.ctl.params().at(row).map(|p| p.name.clone()) {
                            self.dispatch(&ControlEvent::SelectParameter(name));
                        }
                    }
                    None => {}
                }
            }

            if dirty && !self.should_quit {
                self.render_frame()?;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &ControlEvent) {
        match self.ctl.handle(event) {
            Ok(outcome) => {
                log::debug!("{event:?} -> {outcome:?}");
                self.message = match outcome {
                    Outcome::Rendered => None,
                    _ => self.message.take(),
                };
            }
            Err(e @ ControlError::Engine(_)) => {
                log::error!("{event:?}: {e}");
                self.message = Some(format!("render failed, showing last good image: {e}"));
            }
            Err(e) => {
                log::warn!("{event:?}: {e}");
                self.message = Some(e.to_string());
            }
        }
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let bg = Color::Black;
        self.term.cur.clear(bg);
        self.term.canvas.clear(Pixel::default());

        let cols = self.term.cols as i32;
        let rows = self.term.rows as i32;

        // Parameter panel on the left, image on the right, status below.
        let panel_w = min(max(40, cols / 3), cols - 10).max(0);
        let image_h = (rows - 1 - STATUS_ROWS).max(1);
        let vp = Viewport {
            x: panel_w * 2,
            y: 4,
            w: (cols - panel_w) * 2,
            h: (image_h - 1) * 4,
        };
        let frame = self.ctl.frame();
        draw_frame(&mut self.term.canvas, &frame, vp);
        canvas_to_cells(
            &self.term.canvas,
            &mut self.term.cur,
            self.settings.enable_color,
            bg,
        );

        let images = self.ctl.images();
        let title = format!(
            "simview  |  {}  |  {}  |  {} / {}  |  diffuse {}",
            self.source,
            self.ctl.spectrum().label(),
            images.mode.label(),
            images.palette.label(),
            if self.ctl.diffuse() { "on" } else { "off" }
        );
        draw_text(&mut self.term.cur, 1, 0, &title, Color::White, bg);

        let selected = match self.ctl.selected() {
            Ok(name) => Some(name.to_string()),
            Err(_) => None,
        };
        draw_param_panel(
            &mut self.term.cur,
            self.ctl.params(),
            selected.as_deref(),
            Viewport {
                x: 1,
                y: 2,
                w: panel_w - 1,
                h: image_h - 2,
            },
        );

        let footer = format!(
            "h help | q quit | renders: {}",
            self.ctl.engine_calls()
        );
        draw_status(
            &mut self.term.cur,
            &self.ctl.status_lines(),
            self.message.as_deref(),
            &footer,
        );

        if self.show_help {
            let mut body = String::new();
            for (keys, what) in KEY_HELP {
                body.push_str(&format!("{keys:<10} {what}\n"));
            }
            body.push_str("\nRed: reference, blue: current, white: both.\nEsc or H to close help.");
            self.draw_center_box("Keys", &body)?;
        }

        self.term.present(true)?;
        Ok(())
    }

    fn draw_center_box(&mut self, title: &str, body: &str) -> anyhow::Result<()> {
        let w = self.term.cols;
        let h = self.term.rows;

        let bw = min(60, w.saturating_sub(4));
        let bh = min(22, h.saturating_sub(4));
        if bw < 2 || bh < 2 {
            return Ok(());
        }

        let x0 = (w - bw) / 2;
        let y0 = (h - bh) / 2;

        let cell = |ch| Cell {
            ch,
            fg: Color::White,
            bg: Color::Black,
        };

        for y in y0..y0 + bh {
            for x in x0..x0 + bw {
                self.term.cur.set(x, y, cell(' '));
            }
        }
        for x in x0..x0 + bw {
            self.term.cur.set(x, y0, cell('─'));
            self.term.cur.set(x, y0 + bh - 1, cell('─'));
        }
        for y in y0..y0 + bh {
            self.term.cur.set(x0, y, cell('│'));
            self.term.cur.set(x0 + bw - 1, y, cell('│'));
        }
        self.term.cur.set(x0, y0, cell('┌'));
        self.term.cur.set(x0 + bw - 1, y0, cell('┐'));
        self.term.cur.set(x0, y0 + bh - 1, cell('└'));
        self.term.cur.set(x0 + bw - 1, y0 + bh - 1, cell('┘'));

        draw_text(&mut self.term.cur, x0 + 2, y0 + 1, title, Color::White, Color::Black);

        let mut yy = y0 + 3;
        for line in body.lines() {
            if yy >= y0 + bh - 1 {
                break;
            }
            draw_text(&mut self.term.cur, x0 + 2, yy, line, Color::White, Color::Black);
            yy += 1;
        }

        Ok(())
    }
}

pub(crate) fn run(args: Args, paths: Paths) -> anyhow::Result<()> {
    let mut app = App::init(args, paths)?;
    app.run()
}
